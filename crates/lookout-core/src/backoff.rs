//! Jittered exponential backoff for polling cadences.
//!
//! A cadence that keeps failing to reach its worker slows down instead of
//! hammering a dead port at frame rate. Delays grow exponentially from
//! `initial_delay`, are capped at `max_delay`, and carry ±25% jitter so the
//! frame and status cadences do not retry in lockstep.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use rand::Rng;

/// Configuration for retry delays with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Maximum delay as a [`Duration`].
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// `failures == 0` means the last attempt succeeded; callers then use
    /// their normal interval and this returns zero.
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let max = self.max_delay_ms as f64 / 1000.0;
        let base = (self.initial_delay_ms as f64 / 1000.0)
            * self.multiplier.powi(failures.saturating_sub(1) as i32);
        let capped = base.min(max);

        let jitter_range = capped * 0.25;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_secs_f64((capped + jitter).clamp(0.0, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_delay_without_failures() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for_failures(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_grows_within_jitter_bounds() {
        let config = BackoffConfig::default();

        let first = config.delay_for_failures(1);
        assert!(first >= Duration::from_millis(150), "{first:?}");
        assert!(first <= Duration::from_millis(250), "{first:?}");

        let third = config.delay_for_failures(3);
        assert!(third >= Duration::from_millis(600), "{third:?}");
        assert!(third <= Duration::from_millis(1000), "{third:?}");
    }

    #[test]
    fn test_delay_is_capped() {
        let config = BackoffConfig::default();
        for failures in 5..40 {
            assert!(config.delay_for_failures(failures) <= config.max_delay());
        }
    }

    #[test]
    fn test_zero_initial_delay_has_no_jitter() {
        let config = BackoffConfig {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 2.0,
        };
        assert_eq!(config.delay_for_failures(4), Duration::ZERO);
    }
}
