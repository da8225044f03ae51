//! Atomic Red Team emulation tests for a technique.
//!
//! One YAML file per technique (`<raw_base_url>/T1003.006/T1003.006.yaml`)
//! lists its tests. The parsed list is cached for the atomic TTL. A missing
//! file means the technique has no tests and is cached like any answer;
//! other failures are logged and yield no tests.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;

use trr_scout_core::cache::{Cache, CacheKey};
use trr_scout_core::models::TechniqueId;
use trr_scout_core::technique::{AtomicArgument, AtomicTest};

use crate::http::{with_retry, FetchError, PageFetcher, RetryPolicy};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Deserialize)]
struct AtomicsFile {
    #[serde(default)]
    atomic_tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    auto_generated_guid: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    supported_platforms: Vec<String>,
    #[serde(default)]
    input_arguments: Option<serde_yaml::Mapping>,
    #[serde(default)]
    executor: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawArgument {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
}

pub struct AtomicClient {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<dyn Cache>,
    limiter: Arc<RateLimiter>,
    raw_base_url: String,
    browse_base_url: String,
    ttl: Duration,
    retry: RetryPolicy,
}

impl AtomicClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<dyn Cache>,
        limiter: Arc<RateLimiter>,
        raw_base_url: impl Into<String>,
        browse_base_url: impl Into<String>,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            cache,
            limiter,
            raw_base_url: raw_base_url.into(),
            browse_base_url: browse_base_url.into(),
            ttl,
            retry,
        }
    }

    pub fn yaml_url(&self, id: &TechniqueId) -> String {
        format!("{}/{}/{}.yaml", self.raw_base_url.trim_end_matches('/'), id, id)
    }

    pub fn browse_url(&self, id: &TechniqueId) -> String {
        format!("{}/{}/{}.yaml", self.browse_base_url.trim_end_matches('/'), id, id)
    }

    /// Emulation tests for `id`, from cache unless bypassed. Empty when the
    /// technique has none or the fetch failed.
    pub async fn tests_for(&self, id: &TechniqueId, bypass_cache: bool) -> Vec<AtomicTest> {
        let url = self.yaml_url(id);
        let key = CacheKey::derive("atomic", &url, &[]);

        if !bypass_cache {
            if let Some(tests) = self
                .cache
                .get(&key)
                .and_then(|v| serde_json::from_value::<Vec<AtomicTest>>(v).ok())
            {
                tracing::debug!(%id, tests = tests.len(), "atomic cache hit");
                return tests;
            }
        }

        let fetcher = self.fetcher.as_ref();
        let limiter = self.limiter.as_ref();
        let target = url.as_str();
        let fetched = with_retry(&self.retry, target, || async move {
            limiter.wait().await;
            fetcher.get_text(target).await
        })
        .await;

        let tests = match fetched {
            Ok(yaml) => match parse_atomics(&yaml, &self.browse_url(id)) {
                Ok(tests) => tests,
                Err(e) => {
                    tracing::warn!(%id, error = %format!("{:#}", e), "unreadable atomic test file");
                    return Vec::new();
                }
            },
            Err(FetchError::NotFound) => {
                tracing::debug!(%id, "no atomic tests published");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(%id, url = %url, error = %e, "atomic test lookup failed; continuing without it");
                return Vec::new();
            }
        };

        match serde_json::to_value(&tests) {
            Ok(payload) => {
                if let Err(e) = self.cache.put(&key, payload, self.ttl) {
                    tracing::warn!(error = %e, "failed to write atomic cache");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode atomic tests"),
        }
        tests
    }
}

/// Parse an atomics YAML file. `url` is recorded on every test.
pub fn parse_atomics(yaml: &str, url: &str) -> Result<Vec<AtomicTest>> {
    let file: AtomicsFile = serde_yaml::from_str(yaml).context("Failed to parse atomic test YAML")?;
    Ok(file
        .atomic_tests
        .into_iter()
        .map(|raw| convert(raw, url))
        .collect())
}

fn convert(raw: RawTest, url: &str) -> AtomicTest {
    let (executor, command, cleanup_command, elevation_required) = match &raw.executor {
        Some(serde_yaml::Value::Mapping(m)) => {
            let text = |k: &str| {
                m.get(k)
                    .and_then(serde_yaml::Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            (
                text("name").unwrap_or_else(|| "unknown".to_string()),
                text("command").or_else(|| text("steps")),
                text("cleanup_command"),
                m.get("elevation_required")
                    .and_then(serde_yaml::Value::as_bool)
                    .unwrap_or(false),
            )
        }
        Some(serde_yaml::Value::String(name)) => (name.clone(), None, None, false),
        _ => ("unknown".to_string(), None, None, false),
    };

    let input_arguments = raw
        .input_arguments
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| {
            let name = k.as_str()?.to_string();
            let arg: RawArgument = serde_yaml::from_value(v).ok()?;
            Some(AtomicArgument {
                name,
                description: arg.description.unwrap_or_default().trim().to_string(),
                default: arg.default.as_ref().map(yaml_text).unwrap_or_default(),
            })
        })
        .collect();

    AtomicTest {
        name: raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Unnamed Test".to_string()),
        guid: raw.auto_generated_guid.filter(|g| !g.is_empty()),
        description: raw.description.unwrap_or_default().trim().to_string(),
        platforms: raw.supported_platforms,
        executor,
        elevation_required,
        command,
        cleanup_command,
        input_arguments,
        url: url.to_string(),
    }
}

fn yaml_text(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
