//! Exponential backoff with optional full jitter.

use std::time::Duration;

use rand::Rng;

use super::RetryConfig;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: f64,
    multiplier: f64,
    max: f64,
    jitter: bool,
}

impl Backoff {
    /// Assumes a validated config.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: config.base_delay,
            multiplier: config.backoff_multiplier,
            max: config.max_delay,
            jitter: config.jitter,
        }
    }

    /// Upper bound of the wait after the given failed attempt (1-based):
    /// `min(base * multiplier^(attempt-1), max)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if self.base == 0.0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base * self.multiplier.powi(exponent);
        // powi overflows to infinity for large exponents; min() caps it
        Duration::try_from_secs_f64(secs.min(self.max)).unwrap_or(Duration::MAX)
    }

    /// Actual wait after the given failed attempt. With jitter the delay is drawn
    /// uniformly from `[0, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let secs = rand::thread_rng().gen_range(0.0..=ceiling.as_secs_f64());
        Duration::try_from_secs_f64(secs)
            .unwrap_or(ceiling)
            .min(ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base: f64, multiplier: f64, max: f64, jitter: bool) -> Backoff {
        Backoff::from_config(&RetryConfig {
            max_attempts: 5,
            base_delay: base,
            backoff_multiplier: multiplier,
            max_delay: max,
            jitter,
        })
    }

    #[test]
    fn test_exponential_growth() {
        let b = backoff(0.1, 2.0, 30.0, false);
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_capped_at_max_delay() {
        let b = backoff(1.0, 2.0, 5.0, false);
        assert_eq!(b.delay(10), Duration::from_secs(5));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_non_decreasing_without_jitter() {
        let b = backoff(0.25, 1.5, 10.0, false);
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = b.delay(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_within_bounds() {
        let b = backoff(0.5, 2.0, 4.0, true);
        for attempt in 1..=8 {
            let ceiling = b.ceiling(attempt);
            for _ in 0..50 {
                let delay = b.delay(attempt);
                assert!(delay <= ceiling);
            }
        }
    }

    #[test]
    fn test_zero_base_delay() {
        let b = backoff(0.0, 2.0, 0.0, true);
        assert_eq!(b.delay(1), Duration::ZERO);
        assert_eq!(b.delay(1000), Duration::ZERO);
    }

    #[test]
    fn test_unrepresentable_delay_saturates() {
        let b = backoff(1e20, 1.0, 1e20, false);
        assert_eq!(b.ceiling(1), Duration::MAX);

        let b = backoff(1e20, 1.0, 1e20, true);
        assert!(b.delay(3) <= Duration::MAX);
    }

    #[test]
    fn test_constant_schedule() {
        let b = backoff(1.0, 1.0, 1.0, false);
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(60), Duration::from_secs(1));
    }
}
