//! Cached, rate-limited, retrying search.
//!
//! [`SearchClient::search`] is the only way the pipeline talks to a search
//! engine:
//!
//! ```text
//! cache hit? ──yes──▶ cached hits
//!     │ no (or bypassed)
//!     ▼
//! rate-limit wait ─▶ backend.search ─▶ retry 429/5xx/network with backoff
//!     │ success                               │ exhausted / permanent
//!     ▼                                       ▼
//! write cache, return hits            warn!, return empty
//! ```
//!
//! Failures never propagate: an empty list is a valid answer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use trr_scout_core::cache::{Cache, CacheKey};
use trr_scout_core::models::RawHit;

use crate::backend::SearchBackend;
use crate::http::{with_retry, RetryPolicy};
use crate::rate_limit::RateLimiter;

/// Counters for one client's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub queries: usize,
    pub cache_hits: usize,
    pub backend_calls: usize,
    pub failures: usize,
}

pub struct SearchClient {
    backend: Arc<dyn SearchBackend>,
    cache: Arc<dyn Cache>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    ttl: Duration,
    queries: AtomicUsize,
    cache_hits: AtomicUsize,
    backend_calls: AtomicUsize,
    failures: AtomicUsize,
}

impl SearchClient {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn Cache>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            limiter,
            retry,
            ttl,
            queries: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            backend_calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Key for `query` under this backend and result cap.
    pub fn cache_key(&self, query: &str, max_results: usize) -> CacheKey {
        CacheKey::derive(
            "search",
            query,
            &[self.backend.name(), &max_results.to_string()],
        )
    }

    /// Hits for `query`, from cache unless `bypass_cache`. A bypassed call
    /// still stores its fresh result.
    pub async fn search(&self, query: &str, max_results: usize, bypass_cache: bool) -> Vec<RawHit> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let key = self.cache_key(query, max_results);

        if !bypass_cache {
            if let Some(payload) = self.cache.get(&key) {
                match serde_json::from_value::<Vec<RawHit>>(payload) {
                    Ok(hits) => {
                        tracing::debug!(query, hits = hits.len(), "search cache hit");
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        return hits;
                    }
                    Err(e) => tracing::debug!(query, error = %e, "cached payload unreadable"),
                }
            }
        }

        tracing::debug!(query, "search cache miss");
        let backend = self.backend.as_ref();
        let limiter = self.limiter.as_ref();
        let calls = &self.backend_calls;

        let result = with_retry(&self.retry, query, || async move {
            limiter.wait().await;
            calls.fetch_add(1, Ordering::Relaxed);
            backend.search(query, max_results).await
        })
        .await;

        match result {
            Ok(hits) => {
                let payload = match serde_json::to_value(&hits) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(query, error = %e, "failed to encode hits for cache");
                        return hits;
                    }
                };
                if let Err(e) = self.cache.put(&key, payload, self.ttl) {
                    tracing::warn!(query, error = %e, "failed to write search cache");
                }
                hits
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(query, error = %e, "search failed; continuing without results");
                Vec::new()
            }
        }
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            queries: self.queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
