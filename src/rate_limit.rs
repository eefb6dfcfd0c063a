//! Minimum-spacing rate limiter for one class of external calls.
//!
//! A limiter configured for `R` requests per minute grants slots at least
//! `60s / R` apart. The first grant on a fresh limiter is immediate, so a
//! stage never idles before its first call. Each pipeline stage owns its
//! own limiter; limiters are never shared between stages.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::JobError;

#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limiter for a requests-per-minute ceiling. Zero is rejected.
    pub fn per_minute(requests_per_minute: u32) -> Result<Self, JobError> {
        if requests_per_minute == 0 {
            return Err(JobError::Configuration(
                "requests per minute must be greater than zero".to_string(),
            ));
        }
        Ok(Self::with_spacing(
            Duration::from_secs(60) / requests_per_minute,
        ))
    }

    pub fn with_spacing(spacing: Duration) -> Self {
        Self {
            spacing,
            last_grant: Mutex::new(None),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait until the next slot is available, then claim it.
    ///
    /// Waits `spacing - elapsed_since_last_grant` and never returns early.
    /// Concurrent callers are granted strictly one after another.
    pub async fn wait_slot(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.spacing).await;
        }
        *last = Some(Instant::now());
    }
}
