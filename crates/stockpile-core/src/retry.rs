//! Bounded retry with exponential backoff for uploads

use std::time::Duration;

use crate::store::StoreError;

/// How many times to retry a transient failure, and how long to wait
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests)
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: base · 2^(attempt-1) (1s, 2s, 4s, ... for a 1s base)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Retry a fallible store operation with exponential backoff.
///
/// Retries only errors that report themselves retryable, at most
/// `policy.max_retries` times. Returns the first success or the last error.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = policy.backoff_duration(attempt);
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                std::thread::sleep(delay);
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(3), Duration::from_secs(4));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry_with_backoff("t", &RetryPolicy::immediate(3), || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::new("flaky", true))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("t", &RetryPolicy::immediate(2), || {
            calls += 1;
            Err(StoreError::new("down", true))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_error_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("t", &RetryPolicy::immediate(5), || {
            calls += 1;
            Err(StoreError::new("bad key", false))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
