use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::duration_ms;

/// Retry schedule for one webhook.
///
/// `max_retries` counts attempts *beyond* the first, so a failing endpoint
/// sees at most `max_retries + 1` requests per event.
///
/// Invariants (checked by [`RetryPolicy::validate`]):
/// - `initial_delay > 0`
/// - `backoff_factor >= 1.0`
/// - `max_delay >= initial_delay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,

    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,

    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::InvalidRetryPolicy(
                "initial_delay must be greater than zero".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "backoff_factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "max_delay ({:?}) must be >= initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    /// Delay to wait after `attempt` failed attempts, before the next one.
    ///
    /// `attempt` is 1-based: `delay_for(1)` is the pause between the first and
    /// second request. Computed as `initial_delay * backoff_factor^(attempt-1)`
    /// capped at `max_delay`. Pure; the same inputs always give the same output.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let scaled_nanos =
            self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);

        if !scaled_nanos.is_finite() || scaled_nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(scaled_nanos.round().max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64, factor: f64) -> RetryPolicy {
        RetryPolicy::new(
            5,
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            factor,
        )
    }

    #[test]
    fn exponential_growth_until_cap() {
        let p = policy(10, 100, 2.0);
        assert_eq!(p.delay_for(1), Duration::from_millis(10));
        assert_eq!(p.delay_for(2), Duration::from_millis(20));
        assert_eq!(p.delay_for(3), Duration::from_millis(40));
        assert_eq!(p.delay_for(4), Duration::from_millis(80));
        assert_eq!(p.delay_for(5), Duration::from_millis(100));
        assert_eq!(p.delay_for(60), Duration::from_millis(100));
    }

    #[test]
    fn delays_are_monotonic_and_capped() {
        let p = policy(7, 5_000, 1.7);
        let mut previous = Duration::ZERO;
        for attempt in 1..200 {
            let delay = p.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= p.max_delay);
            previous = delay;
        }
        assert_eq!(previous, p.max_delay);
    }

    #[test]
    fn factor_one_is_constant() {
        let p = policy(250, 1_000, 1.0);
        for attempt in 1..10 {
            assert_eq!(p.delay_for(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn attempt_zero_behaves_like_first() {
        let p = policy(10, 100, 2.0);
        assert_eq!(p.delay_for(0), p.delay_for(1));
    }

    #[test]
    fn validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(policy(0, 100, 2.0).validate().is_err());
        assert!(policy(10, 100, 0.5).validate().is_err());
        assert!(policy(10, 100, f64::NAN).validate().is_err());
        assert!(policy(100, 10, 2.0).validate().is_err());
        assert!(policy(10, 10, 1.0).validate().is_ok());
    }

    #[test]
    fn serializes_delays_as_millis() {
        let json = serde_json::to_value(policy(10, 20, 2.0)).unwrap();
        assert_eq!(json["initial_delay_ms"], 10);
        assert_eq!(json["max_delay_ms"], 20);

        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back.initial_delay, Duration::from_millis(10));
    }
}
