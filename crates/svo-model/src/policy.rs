//! Retry policy
//!
//! Effective delay after failed attempt *n* is `base × multiplier^(n−1)`,
//! capped at a caller-supplied ceiling.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry/backoff policy for one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    /// Growth factor between consecutive delays (>= 1.0)
    pub backoff_multiplier: f64,
    /// Delay after the first failed attempt, in milliseconds
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// Create a policy
    #[inline]
    #[must_use]
    pub fn new(max_attempts: u32, backoff_multiplier: f64, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_multiplier,
            base_delay_ms,
        }
    }

    /// Single attempt, no backoff
    #[inline]
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, 1.0, 0)
    }

    /// Base delay as a `Duration`
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Check policy bounds
    ///
    /// # Errors
    /// - `PolicyError::ZeroAttempts` if `max_attempts` is 0
    /// - `PolicyError::InvalidMultiplier` if the multiplier is below 1.0 or not finite
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts(self.max_attempts));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempt` attempts have run
    #[inline]
    #[must_use]
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff to wait after failed attempt `attempt` (1-based), capped at `ceiling`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, ceiling: Duration) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let nanos = (self.base_delay().as_nanos() as f64) * factor;
        let ceiling_nanos = ceiling.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= ceiling_nanos {
            ceiling
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 2.0, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CEILING: Duration = Duration::from_secs(30);

    #[test]
    fn delays_follow_exponential_schedule() {
        let policy = RetryPolicy::new(3, 2.0, 50);
        assert_eq!(policy.delay_for_attempt(1, CEILING), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(2, CEILING), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3, CEILING), Duration::from_millis(200));
    }

    #[test]
    fn delays_are_capped_at_ceiling() {
        let policy = RetryPolicy::new(50, 10.0, 1_000);
        assert_eq!(policy.delay_for_attempt(40, CEILING), CEILING);
    }

    #[test]
    fn validate_rejects_out_of_bounds() {
        assert_eq!(
            RetryPolicy::new(0, 2.0, 10).validate(),
            Err(PolicyError::ZeroAttempts(0))
        );
        assert!(matches!(
            RetryPolicy::new(3, 0.5, 10).validate(),
            Err(PolicyError::InvalidMultiplier(_))
        ));
        assert!(RetryPolicy::new(3, f64::NAN, 10).validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::no_retry().validate().is_ok());
    }

    #[test]
    fn allows_another_respects_max_attempts() {
        let policy = RetryPolicy::new(3, 1.0, 0);
        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    proptest! {
        #[test]
        fn delay_matches_formula_within_tolerance(
            attempts in 1u32..8,
            multiplier in 1.0f64..4.0,
            base in 1u64..500,
        ) {
            let policy = RetryPolicy::new(10, multiplier, base);
            let expected_ms = base as f64 * multiplier.powi(attempts as i32 - 1);
            let actual_ms = policy.delay_for_attempt(attempts, Duration::from_secs(1_000_000)).as_secs_f64() * 1_000.0;
            prop_assert!((actual_ms - expected_ms).abs() < 0.01);
        }

        #[test]
        fn delay_never_exceeds_ceiling(attempts in 1u32..64, multiplier in 1.0f64..16.0, base in 0u64..10_000) {
            let policy = RetryPolicy::new(64, multiplier, base);
            prop_assert!(policy.delay_for_attempt(attempts, CEILING) <= CEILING);
        }
    }
}
