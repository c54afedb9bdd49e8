//! Retry policy.
//!
//! # Responsibilities
//! - Bound the number of attempts per operation
//! - Compute the delay before each retry
//!
//! # Design Decisions
//! - Forwarded requests and health probes each get their own policy
//! - The budget counts retries; total attempts are `retries + 1`

use std::time::Duration;

use crate::config::{HealthCheckConfig, RetryConfig};
use crate::resilience::backoff::linear_backoff;

/// Bounded attempts with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Base delay; retry `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        linear_backoff(retry, self.base_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.count, config.base_delay())
    }
}

impl From<&HealthCheckConfig> for RetryPolicy {
    fn from(config: &HealthCheckConfig) -> Self {
        Self::new(config.retries, config.base_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.delay(2), Duration::from_millis(400));

        let probe = RetryPolicy::from(&HealthCheckConfig::default());
        assert_eq!(probe.retries, 2);
        assert_eq!(probe.delay(1), Duration::from_millis(100));
    }
}
