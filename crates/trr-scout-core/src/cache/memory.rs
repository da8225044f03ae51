//! In-memory [`Cache`] implementation for tests and cache-less runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Time comes from an injected
//! [`Clock`] so TTL behaviour can be tested without sleeping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::{Cache, CacheEntry, CacheKey, Clock, SystemClock};

/// In-memory cache.
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `key` if it is still expired at `now`. A writer may have
    /// refreshed it between the read and write locks.
    fn prune_expired(&self, key: &CacheKey, now: DateTime<Utc>) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(key);
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().ok()?;
            let entry = entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.payload.clone());
            }
        }
        self.prune_expired(key, now);
        None
    }

    fn put(&self, key: &CacheKey, payload: serde_json::Value, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(key.clone(), payload, self.clock.now(), ttl);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        entries.insert(key.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn setup() -> (Arc<ManualClock>, InMemoryCache) {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let cache = InMemoryCache::with_clock(clock.clone());
        (clock, cache)
    }

    #[test]
    fn miss_when_absent() {
        let (_, cache) = setup();
        assert!(cache.get(&CacheKey::derive("search", "q", &[])).is_none());
    }

    #[test]
    fn hit_before_ttl_miss_after() {
        let (clock, cache) = setup();
        let key = CacheKey::derive("search", "q", &[]);
        let ttl = Duration::hours(24);
        cache.put(&key, serde_json::json!(["a"]), ttl).unwrap();

        clock.advance(ttl - Duration::seconds(1));
        assert_eq!(cache.get(&key), Some(serde_json::json!(["a"])));

        clock.advance(Duration::seconds(2));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty(), "expired entry should be pruned on read");
    }

    #[test]
    fn prune_keeps_entry_refreshed_after_expiry_was_seen() {
        let (clock, cache) = setup();
        let key = CacheKey::derive("search", "q", &[]);
        cache.put(&key, serde_json::json!("stale"), Duration::seconds(10)).unwrap();
        clock.advance(Duration::seconds(20));
        let seen_expired_at = clock.now();

        // Another writer refreshes the key before the prune takes the lock.
        cache.put(&key, serde_json::json!("fresh"), Duration::hours(1)).unwrap();
        cache.prune_expired(&key, seen_expired_at);

        assert_eq!(cache.get(&key), Some(serde_json::json!("fresh")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn put_is_last_write_wins() {
        let (_, cache) = setup();
        let key = CacheKey::derive("search", "q", &[]);
        cache.put(&key, serde_json::json!(1), Duration::hours(1)).unwrap();
        cache.put(&key, serde_json::json!(2), Duration::hours(1)).unwrap();
        cache.put(&key, serde_json::json!(2), Duration::hours(1)).unwrap();
        assert_eq!(cache.get(&key), Some(serde_json::json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn refetch_resets_created_at() {
        let (clock, cache) = setup();
        let key = CacheKey::derive("search", "q", &[]);
        let ttl = Duration::seconds(10);
        cache.put(&key, serde_json::json!("old"), ttl).unwrap();
        clock.advance(Duration::seconds(8));
        cache.put(&key, serde_json::json!("new"), ttl).unwrap();
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.get(&key), Some(serde_json::json!("new")));
    }
}
