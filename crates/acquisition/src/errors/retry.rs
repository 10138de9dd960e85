//! Retry policy for a single source call.
//!
//! Strategies are stateless: the invoker owns the attempt counter and asks the
//! strategy after each failure. Attempts are numbered from 1.

use std::fmt::Debug;
use std::time::Duration;

use super::MarketDataError;

/// Decides whether a failed attempt is retried and how long to wait first.
pub trait RetryStrategy: Send + Sync + Debug {
    /// Upper bound on attempts, including the first.
    fn max_attempts(&self) -> u32;

    /// Whether `error`, observed on attempt number `attempt`, warrants another try.
    fn should_retry(&self, error: &MarketDataError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts()
    }

    /// Wait before the attempt following attempt number `attempt`.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff: `min(max_delay, base_delay * multiplier^(attempt - 1))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ExponentialBackoff {
    /// Default backoff with a different attempt budget.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Single attempt, never retried.
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64);
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_nanos(capped.round() as u64)
        } else {
            self.max_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_default_backoff_sequence() {
        let backoff = ExponentialBackoff::default();

        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(16));
        assert_eq!(backoff.delay(6), Duration::from_secs(30)); // capped
        assert_eq!(backoff.delay(60), Duration::from_secs(30));
    }

    #[test]
    fn test_retries_retryable_errors_until_budget() {
        let backoff = ExponentialBackoff::default();
        let error = MarketDataError::new(ErrorKind::Timeout, "A", "slow");

        assert!(backoff.should_retry(&error, 1));
        assert!(backoff.should_retry(&error, 2));
        assert!(!backoff.should_retry(&error, 3));
    }

    #[test]
    fn test_never_retries_terminal_errors() {
        let backoff = ExponentialBackoff::default();

        for kind in [
            ErrorKind::Auth,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Validation,
        ] {
            let error = MarketDataError::new(kind, "A", "terminal");
            assert!(!backoff.should_retry(&error, 1), "{kind}");
        }
    }

    #[test]
    fn test_no_retry() {
        let backoff = ExponentialBackoff::no_retry();
        let error = MarketDataError::new(ErrorKind::Network, "A", "reset");
        assert_eq!(backoff.max_attempts(), 1);
        assert!(!backoff.should_retry(&error, 1));
    }

    #[test]
    fn test_custom_multiplier() {
        let backoff = ExponentialBackoff {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 3.0,
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(300));
        assert_eq!(backoff.delay(3), Duration::from_millis(900));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
    }
}
