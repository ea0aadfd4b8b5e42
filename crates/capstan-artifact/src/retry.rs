//! Retry policy for transient transport failures.

use std::thread;
use std::time::Duration;

use capstan_common::CapstanResult;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Re-invokes an operation while it fails with a retryable error.
///
/// Only errors whose [`is_retryable`](capstan_common::CapstanError::is_retryable)
/// is true are retried. Anything else propagates on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Zero counts as one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Retry immediately, without pausing.
    #[must_use]
    pub const fn no_delay(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// A single attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::no_delay(1)
    }

    /// Run `operation` until it succeeds, fails fatally, or the attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last retryable error
    /// once every attempt is used.
    pub fn run<T, F>(&self, mut operation: F) -> CapstanResult<T>
    where
        F: FnMut() -> CapstanResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    tracing::warn!(attempt, max_attempts, error = %err, "Giving up");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay = ?self.delay,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
            }
        }
    }
}
