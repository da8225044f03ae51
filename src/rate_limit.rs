//! Spacing between outbound requests to the same service.
//!
//! [`RateLimiter::wait`] is awaited before every outbound call (including
//! retries). It sleeps until at least `delay` has passed since the previous
//! call was released. The first call goes out immediately.
//!
//! One limiter is shared by every client of a run (search, reference page,
//! emulation tests, repository listing, metadata), so spacing holds across
//! all of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Upper bound on the spacing a limiter will enforce.
pub const MAX_DELAY: Duration = Duration::from_secs(3600);

pub struct RateLimiter {
    delay: Duration,
    last: Mutex<Option<Instant>>,
    waits: AtomicUsize,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
            waits: AtomicUsize::new(0),
        }
    }

    /// Build from a seconds value as written in config (`2.0`, `0.5`).
    ///
    /// Negative and NaN values mean no spacing; anything above
    /// [`MAX_DELAY`] (including infinity) is capped.
    pub fn from_secs_f64(secs: f64) -> Self {
        let delay = if secs.is_nan() || secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(secs)
                .unwrap_or(MAX_DELAY)
                .min(MAX_DELAY)
        };
        Self::new(delay)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of requests released so far.
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}
