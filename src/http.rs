//! HTTP plumbing shared by every outbound fetch.
//!
//! - [`FetchError`] classifies failures so callers know whether to retry.
//! - [`PageFetcher`] is the seam between the pipeline and the network;
//!   [`HttpFetcher`] is the `reqwest` implementation and tests substitute a
//!   canned one.
//! - [`with_retry`] runs an operation with exponential backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately; 404 is reported as
//!   [`FetchError::NotFound`] so callers can treat absence as an answer
//! - Network errors and timeouts → retry
//! - Backoff: base, 2×base, 4×base, ... (exponent capped at 5)

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A classified fetch failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found (HTTP 404)")]
    NotFound,

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::RateLimited | FetchError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            429 => FetchError::RateLimited,
            404 => FetchError::NotFound,
            500..=599 => FetchError::Transient(format!("HTTP {}: {}", status, snippet)),
            _ => FetchError::Permanent(format!("HTTP {}: {}", status, snippet)),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::from_status(status.as_u16(), &e.to_string()),
            None if e.is_builder() => FetchError::Permanent(e.to_string()),
            None => FetchError::Transient(e.to_string()),
        }
    }
}

/// Retry settings for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// No retries, no backoff.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// Returns the last error when every attempt failed.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            tracing::debug!(what, attempt, ?delay, "retrying");
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| FetchError::Transient(format!("{}: no attempts made", what))))
}

/// Fetches a URL as text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// One attempt. Non-success statuses map through [`FetchError::from_status`].
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

/// `reqwest`-backed [`PageFetcher`].
pub struct HttpFetcher {
    client: reqwest::Client,
    github_token: Option<String>,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            github_token: None,
        })
    }

    /// Token sent as a bearer credential to `api.github.com` only.
    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.github_token {
            let host = url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string));
            if host.as_deref() == Some("api.github.com") {
                request = request
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Accept", "application/vnd.github+json");
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FetchError::from_status(status.as_u16(), &body))
    }
}
