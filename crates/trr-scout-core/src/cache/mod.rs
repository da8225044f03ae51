//! TTL-keyed cache abstraction for raw query responses.
//!
//! The [`Cache`] trait is the only shared mutable state in a run. It is
//! constructed explicitly and handed to the components that need it (search
//! client, reference fetch, repository listing), so tests can substitute
//! [`memory::InMemoryCache`] driven by a [`ManualClock`].
//!
//! # Semantics
//!
//! | Operation | Behaviour |
//! |-----------|-----------|
//! | [`get`](Cache::get) | Payload if present and `now - created_at <= ttl`, else `None` |
//! | [`put`](Cache::put) | Last write wins; a refetch replaces the whole entry |
//!
//! A missing entry, an expired entry and an unreadable entry are all the same
//! `None` to the caller.

pub mod memory;

use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic cache key: SHA-256 over namespace, query and scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key from a data-source namespace (`"search"`, `"reference"`,
    /// `"listing"`), the query string, and any scoping parameters that change
    /// the response (result cap, site scope, branch).
    pub fn derive(namespace: &str, query: &str, scope: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(query.as_bytes());
        for part in scope {
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A memoized response. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: serde_json::Value, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key,
            payload,
            created_at,
            ttl_secs: ttl.num_seconds(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs)
    }

    /// Expired strictly after `created_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.ttl()
    }
}

/// Key/value store with per-entry TTL.
///
/// Implementations must be `Send + Sync`; a run shares one instance between
/// its search client, reference fetch and listing fetch.
pub trait Cache: Send + Sync {
    /// Return the payload for `key`, or `None` on a miss or expiry.
    fn get(&self, key: &CacheKey) -> Option<serde_json::Value>;

    /// Store `payload` under `key` for `ttl`, replacing any previous entry.
    fn put(&self, key: &CacheKey, payload: serde_json::Value, ttl: Duration) -> Result<()>;
}

/// Source of "now" for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. For TTL tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
