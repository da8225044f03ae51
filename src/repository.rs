//! Repository listing fetch for existing-report matching.
//!
//! One call to the GitHub git-trees API (`recursive=1`) returns every path
//! in the repository. The listing is cached for the listing TTL; the
//! matching itself is pure and lives in
//! [`trr_scout_core::matcher`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;

use trr_scout_core::cache::{Cache, CacheKey};
use trr_scout_core::matcher::ListingEntry;

use crate::http::{with_retry, PageFetcher, RetryPolicy};
use crate::rate_limit::RateLimiter;

pub struct RepositoryClient {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<dyn Cache>,
    limiter: Arc<RateLimiter>,
    api_base_url: String,
    repo: String,
    branch: String,
    ttl: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl RepositoryClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<dyn Cache>,
        limiter: Arc<RateLimiter>,
        api_base_url: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let repo = repo.into();
        let valid = repo
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
        if !valid {
            bail!("repository must be 'owner/name', got '{}'", repo);
        }
        Ok(Self {
            fetcher,
            cache,
            limiter,
            api_base_url: api_base_url.into(),
            repo,
            branch: branch.into(),
            ttl,
            retry,
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn tree_url(&self) -> String {
        format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_base_url.trim_end_matches('/'),
            self.repo,
            self.branch
        )
    }

    /// The repository file listing, from cache unless bypassed.
    pub async fn listing(&self, bypass_cache: bool) -> Result<Vec<ListingEntry>> {
        let key = CacheKey::derive("listing", &self.repo, &[&self.branch]);

        if !bypass_cache {
            if let Some(entries) = self
                .cache
                .get(&key)
                .and_then(|v| serde_json::from_value::<Vec<ListingEntry>>(v).ok())
            {
                tracing::debug!(repo = %self.repo, entries = entries.len(), "listing cache hit");
                return Ok(entries);
            }
        }

        let url = self.tree_url();
        let fetcher = self.fetcher.as_ref();
        let limiter = self.limiter.as_ref();
        let target = url.as_str();
        let body = with_retry(&self.retry, target, || async move {
            limiter.wait().await;
            fetcher.get_text(target).await
        })
        .await
        .with_context(|| format!("Failed to list repository {}", self.repo))?;

        let entries = parse_tree(&body)?;

        let payload = serde_json::to_value(&entries)?;
        if let Err(e) = self.cache.put(&key, payload, self.ttl) {
            tracing::warn!(error = %e, "failed to write listing cache");
        }
        Ok(entries)
    }
}

/// Parse a git-trees API response into listing entries.
pub fn parse_tree(body: &str) -> Result<Vec<ListingEntry>> {
    let response: TreeResponse =
        serde_json::from_str(body).with_context(|| "Failed to parse repository tree response")?;
    if response.truncated {
        tracing::warn!("repository tree listing was truncated; some reports may be missed");
    }
    Ok(response
        .tree
        .into_iter()
        .map(|item| ListingEntry {
            is_file: item.kind == "blob",
            path: item.path,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trr_scout_core::cache::memory::InMemoryCache;

    const TREE: &str = r#"{
        "sha": "abc",
        "tree": [
            {"path": "reports", "type": "tree"},
            {"path": "reports/trr0001/win/README.md", "type": "blob", "size": 10},
            {"path": "reports/trr0001/win/ddm.png", "type": "blob"}
        ],
        "truncated": false
    }"#;

    struct CannedFetcher {
        body: Result<String, FetchError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn get_text(&self, _url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body.clone()
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(std::time::Duration::ZERO))
    }

    fn client(body: Result<String, FetchError>) -> (Arc<CannedFetcher>, Arc<RateLimiter>, RepositoryClient) {
        let fetcher = Arc::new(CannedFetcher {
            body,
            calls: AtomicUsize::new(0),
        });
        let limiter = limiter();
        let c = RepositoryClient::new(
            fetcher.clone(),
            Arc::new(InMemoryCache::new()),
            limiter.clone(),
            "https://api.github.com",
            "tired-labs/techniques",
            "main",
            Duration::days(30),
            RetryPolicy::none(),
        )
        .unwrap();
        (fetcher, limiter, c)
    }

    #[test]
    fn parses_blobs_and_trees() {
        let entries = parse_tree(TREE).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(!entries[0].is_file);
        assert!(entries[1].is_file);
        assert_eq!(entries[1].path, "reports/trr0001/win/README.md");
    }

    #[test]
    fn rejects_bad_repo_names() {
        for repo in ["", "noslash", "/x", "a/b/c"] {
            assert!(RepositoryClient::new(
                Arc::new(CannedFetcher {
                    body: Ok(String::new()),
                    calls: AtomicUsize::new(0)
                }),
                Arc::new(InMemoryCache::new()),
                limiter(),
                "https://api.github.com",
                repo,
                "main",
                Duration::days(30),
                RetryPolicy::none(),
            )
            .is_err());
        }
    }

    #[tokio::test]
    async fn listing_is_cached() {
        let (fetcher, limiter, c) = client(Ok(TREE.to_string()));
        assert_eq!(
            c.tree_url(),
            "https://api.github.com/repos/tired-labs/techniques/git/trees/main?recursive=1"
        );
        assert_eq!(c.listing(false).await.unwrap().len(), 3);
        assert_eq!(c.listing(false).await.unwrap().len(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.waits(), 1);

        c.listing(true).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.waits(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_an_error() {
        let (_, _, c) = client(Err(FetchError::NotFound));
        let err = c.listing(false).await.unwrap_err();
        assert!(err.to_string().contains("tired-labs/techniques"));
    }
}
