//! Bounded local retry with exponential backoff against a single endpoint.

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts against one endpoint, including the first try.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every attempt after it.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Retry policy: computes backoff delays and drives the local attempt loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay slept after the failed attempt `attempt_index` (0-based):
    /// `base_delay * 2^attempt_index`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        2u32.checked_pow(attempt_index)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Returns `true` if another attempt is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.config.max_attempts
    }

    /// Run `op` until it succeeds, fails with a terminal error, or the
    /// attempt budget is spent. The last error is returned on failure.
    ///
    /// `target` only labels log lines.
    pub async fn run<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempts_made = 0u32;
        loop {
            let attempt_index = attempts_made;
            attempts_made += 1;
            let err = match op(attempt_index).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::debug!(
                    attempt = attempts_made,
                    error = %err,
                    url = %target,
                    "terminal error, not retrying"
                );
                return Err(err);
            }

            if !self.should_retry(attempts_made) {
                tracing::error!(
                    attempt = attempts_made,
                    error = %err,
                    url = %target,
                    "max retries exceeded"
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt_index);
            tracing::warn!(
                attempt = attempts_made,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                url = %target,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
