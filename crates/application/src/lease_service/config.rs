use std::time::Duration;

use leasekeeper_core::{AppError, AppResult};

/// Bounded retry applied to store calls that fail with `Transient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy with exponential backoff.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "retry max_attempts must be greater than zero".to_owned(),
            ));
        }

        if initial_backoff > max_backoff {
            return Err(AppError::Validation(
                "retry initial_backoff must not exceed max_backoff".to_owned(),
            ));
        }

        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        })
    }

    /// Returns the policy with a different attempt budget and the same backoff.
    pub fn with_max_attempts(self, max_attempts: u32) -> AppResult<Self> {
        Self::new(max_attempts, self.initial_backoff, self.max_backoff)
    }

    /// Returns the total number of attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay after the given 1-based failed attempt.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Lease manager tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseManagerConfig {
    lease_duration: Duration,
    retry_policy: RetryPolicy,
}

impl LeaseManagerConfig {
    /// Default lock duration of one lease.
    pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

    /// Creates a validated configuration.
    pub fn new(lease_duration: Duration, retry_policy: RetryPolicy) -> AppResult<Self> {
        if lease_duration.is_zero() {
            return Err(AppError::Validation(
                "lease_duration must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            lease_duration,
            retry_policy,
        })
    }

    /// Returns how long an acquired or renewed lock stays valid.
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Returns the retry policy for transient store failures.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Suggested renewal period: two thirds of the lease duration.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        self.lease_duration.saturating_mul(2) / 3
    }
}

impl Default for LeaseManagerConfig {
    fn default() -> Self {
        Self {
            lease_duration: Self::DEFAULT_LEASE_DURATION,
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{LeaseManagerConfig, RetryPolicy};

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350))
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn retry_policy_requires_one_attempt() {
        assert!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn renew_interval_is_two_thirds_of_lease() {
        let config = LeaseManagerConfig::default();
        assert_eq!(config.renew_interval(), Duration::from_secs(20));
        assert!(LeaseManagerConfig::new(Duration::ZERO, RetryPolicy::default()).is_err());
    }
}
