//! Backoff policy: decides retry delays.

use std::time::Duration;

/// How long a retried record waits before it becomes eligible again.
///
/// The delay actually applied to a `Retry(d)` outcome is
/// `max(d, policy.delay_for(attempt))`, see [`BackoffPolicy::effective_delay`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Same delay for every attempt.
    Fixed { delay: Duration },

    /// `base * factor^(attempt - 1)`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        BackoffPolicy::Fixed { delay }
    }

    pub fn exponential(base: Duration, factor: f64, max: Duration) -> Self {
        BackoffPolicy::Exponential { base, factor, max }
    }

    /// Delay for the given attempt (1-indexed; 0 is treated as 1).
    ///
    /// Example with base=2s, factor=2.0, max=30s:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 5: 30s (capped)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = base.as_secs_f64() * factor.powi(exponent);
                Duration::try_from_secs_f64(secs)
                    .map_or(*max, |delay| delay.min(*max))
            }
        }
    }

    /// The handler's requested delay, raised to the policy floor.
    pub fn effective_delay(&self, requested: Duration, attempt: u32) -> Duration {
        requested.max(self.delay_for(attempt))
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            BackoffPolicy::Fixed { .. } => Ok(()),
            BackoffPolicy::Exponential { base, factor, max } => {
                if !factor.is_finite() || *factor < 1.0 {
                    return Err(format!("backoff factor must be >= 1.0, got {factor}"));
                }
                if base > max {
                    return Err(format!(
                        "backoff base {base:?} is larger than its cap {max:?}"
                    ));
                }
                Ok(())
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 2)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(5, 30)]
    #[case(40, 30)]
    fn exponential_backoff_grows_until_capped(#[case] attempt: u32, #[case] secs: u64) {
        let policy = BackoffPolicy::exponential(
            Duration::from_secs(2),
            2.0,
            Duration::from_secs(30),
        );
        assert_eq!(policy.delay_for(attempt), Duration::from_secs(secs));
    }

    #[test]
    fn huge_exponent_saturates_to_cap() {
        let policy = BackoffPolicy::exponential(
            Duration::from_secs(1),
            10.0,
            Duration::from_secs(60),
        );
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn fixed_backoff_ignores_attempt() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(9), Duration::from_secs(30));
    }

    #[rstest]
    #[case(Duration::from_secs(1), Duration::from_secs(5))]
    #[case(Duration::from_secs(60), Duration::from_secs(60))]
    fn effective_delay_takes_the_larger(#[case] requested: Duration, #[case] expected: Duration) {
        let policy = BackoffPolicy::fixed(Duration::from_secs(5));
        assert_eq!(policy.effective_delay(requested, 1), expected);
    }

    #[test]
    fn validate_rejects_shrinking_factor() {
        let policy = BackoffPolicy::exponential(
            Duration::from_secs(1),
            0.5,
            Duration::from_secs(10),
        );
        assert!(policy.validate().is_err());
        assert!(BackoffPolicy::default().validate().is_ok());
    }
}
