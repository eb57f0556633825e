//! Retry policy for cached queries.

use crate::error::{RequestError, RequestResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Ceiling for any single delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Policy for mutations: one attempt, no retries.
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate the delay before retry `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Whether a failure after `retries_done` retries earns another attempt.
    pub fn should_retry(&self, retries_done: u32, error: &RequestError) -> bool {
        retries_done < self.max_retries && error.is_retryable()
    }

    /// Run `operation`, retrying retryable failures with backoff.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> RequestResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RequestResult<T>>,
    {
        let mut retries_done = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(retries_done, &err) => {
                    let delay = self.delay_for_attempt(retries_done);
                    retries_done += 1;
                    debug!(
                        attempt = retries_done,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        classification = ?err.classification(),
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if retries_done > 0 {
                        warn!(attempts = retries_done + 1, error = %err, "Request failed after retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}
