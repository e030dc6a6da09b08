//! Retry with exponential backoff for remote calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limits::duration_ms;

/// How often and how patiently a transient failure is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_ms", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or attempts run out. The last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        mut operation: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(what, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if attempt < attempts && is_retryable(&error) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(what, attempt, error = %error, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
