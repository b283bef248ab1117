//! Retry delay schedule and timeout utilities.

use std::future::Future;
use std::time::Duration;

/// Retry configuration with a squared-backoff delay schedule.
///
/// After the k-th failed attempt (1-indexed) the caller waits
/// `k^2 * base_delay` before attempt k+1: with the default 1 s base this
/// gives 1 s, 4 s, 9 s, ...
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base delay unit; the wait after attempt k is `k^2 * base_delay`.
    pub base_delay: Duration,
    /// Cap applied to any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a config for no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    ///
    /// Attempt numbers at or beyond `max_attempts` get no delay: there is no
    /// further attempt to wait for.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || attempt >= self.max_attempts {
            return Duration::ZERO;
        }

        let factor = u32::try_from((attempt as u64).saturating_mul(attempt as u64))
            .unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}

/// Run an operation with a timeout.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> crate::DexResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| crate::DexError::Timeout(timeout))
}
