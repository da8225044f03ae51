//! On-disk [`Cache`] implementation.
//!
//! One JSON file per entry at `<dir>/<hex key>.json`, holding the full
//! [`CacheEntry`] (payload, creation time, TTL). Writes go to a temporary
//! file in the same directory and are renamed into place, so a reader sees
//! either the old entry or the new one, never a partial file.
//!
//! | Situation | `get` result |
//! |-----------|--------------|
//! | file missing | miss |
//! | file unreadable or not valid JSON | miss (logged at debug) |
//! | entry expired | miss, file removed |
//! | entry fresh | hit |

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;

use trr_scout_core::cache::{Cache, CacheEntry, CacheKey, Clock, SystemClock};

pub struct FileCache {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileCache {
    /// The directory is not touched until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

impl Cache for FileCache {
    fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let path = self.path_for(key);
        let content = std::fs::read_to_string(&path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "unreadable cache entry");
                return None;
            }
        };
        if &entry.key != key {
            tracing::debug!(path = %path.display(), "cache entry key mismatch");
            return None;
        }

        if entry.is_expired(self.clock.now()) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "failed to remove expired entry");
            }
            return None;
        }

        Some(entry.payload)
    }

    fn put(&self, key: &CacheKey, payload: serde_json::Value, ttl: Duration) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;

        let entry = CacheEntry::new(key.clone(), payload, self.clock.now(), ttl);
        let body = serde_json::to_vec(&entry)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(&body)?;
        tmp.flush()?;

        let path = self.path_for(key);
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;
        Ok(())
    }
}

/// Delete the cache directory. Returns the number of entries removed.
pub fn clear_cache(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let count = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read cache directory: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .count();
    std::fs::remove_dir_all(dir)
        .with_context(|| format!("Failed to remove cache directory: {}", dir.display()))?;
    Ok(count)
}
