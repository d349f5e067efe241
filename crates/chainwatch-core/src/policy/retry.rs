//! Exponential backoff retry executor.
//!
//! Wraps an arbitrary async operation and re-runs it on failure. The delay
//! before retry `i` (1-based) is `min(min_timeout * 2^(i-1), max_timeout)`;
//! there is no delay before the first attempt. After `retries + 1` failed
//! attempts the error of the last attempt is returned.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub retries: u32,
    /// Delay before the first retry; also the lower bound of every delay.
    pub min_timeout: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new(retries: u32, min_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            retries,
            min_timeout,
            max_timeout,
        }
    }

    /// Shorthand taking millisecond values.
    pub fn from_millis(retries: u32, min_ms: u64, max_ms: u64) -> Self {
        Self::new(
            retries,
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        )
    }

    /// `min_timeout` must be non-zero and no larger than `max_timeout`.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.min_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "min_timeout must be greater than zero".into(),
            ));
        }
        if self.max_timeout < self.min_timeout {
            return Err(TransportError::InvalidConfig(format!(
                "max_timeout ({:?}) is below min_timeout ({:?})",
                self.max_timeout, self.min_timeout
            )));
        }
        Ok(())
    }
}

/// Stateless retry policy. Every call to [`RetryPolicy::run`] starts with a
/// fresh budget; nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` is zero or exceeds `retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || !self.should_retry(attempt) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .config
            .min_timeout
            .saturating_mul(factor)
            .max(self.config.min_timeout)
            .min(self.config.max_timeout);
        Some(delay)
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.retries
    }

    /// Run `op` until it succeeds or the retry budget is spent.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(op, |_| true).await
    }

    /// Like [`RetryPolicy::run`], but errors rejected by `retryable` are
    /// returned immediately without consuming the budget.
    pub async fn run_if<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(e),
                Err(e) => e,
            };
            attempt += 1;
            match self.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(attempts = attempt, error = %err, "retry budget exhausted");
                    return Err(err);
                }
            }
        }
    }
}

/// Run `op` once under `config`. See [`RetryPolicy::run`].
pub async fn retry_with_backoff<T, E, F, Fut>(config: RetryConfig, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    RetryPolicy::new(config).run(op).await
}
