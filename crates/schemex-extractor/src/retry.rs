//! Bounded exponential-backoff retry for oracle calls

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use schemex_core::{OracleFailure, RetryConfig};

/// Retry policy for transient oracle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `f` until it succeeds, fails terminally, or retries run out.
    ///
    /// Only failures with [`OracleFailure::is_transient`] are retried.
    pub async fn retry<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, OracleFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleFailure>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation,
                            attempts = attempt + 1,
                            "Oracle call succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(failure) if !failure.is_transient() => return Err(failure),
                Err(failure) => {
                    attempt += 1;
                    if attempt as usize > self.max_retries {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %failure,
                            "Oracle call failed after max retries"
                        );
                        return Err(failure);
                    }

                    let backoff = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %failure,
                        "Oracle call failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }
}
