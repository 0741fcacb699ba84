//! Bounded retry with exponential backoff.

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

/// How many times to try and how long to wait in between.
///
/// The delay before retry `k` (1-based) is `base_delay * 2^(k-1)`, capped
/// at `max_delay`. No jitter, so schedules are reproducible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay, config.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times((self.max_attempts - 1) as usize)
    }

    /// The full delay schedule, one entry per retry.
    pub fn delays(&self) -> Vec<Duration> {
        self.backoff().build().collect()
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, or
    /// the attempt budget is spent. The last error is returned.
    pub async fn run<T, E, F, Fut, R>(&self, op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        op.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(retryable)
            .notify(|err: &E, delay: Duration| {
                tracing::warn!(error = %err, delay = ?delay, "Attempt failed, retrying");
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
