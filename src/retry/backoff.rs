use rand::Rng;
use std::time::Duration;

use super::classify::Classification;
use crate::config::ReliabilityConfig;

/// Exponent cap: delays stop growing after this many consecutive failures.
const EXPONENT_CAP: u32 = 6;

/// Jitter band applied to every computed delay.
const JITTER_FRACTION: f64 = 0.2;

/// Delay parameters shared by all remote calls.
///
/// `RateLimit` failures use a longer base than plain `Transient` ones, and a
/// server-provided retry-after hint is honored when it exceeds the computed
/// delay. Every delay is clamped to `max` so the service never sleeps for
/// unbounded periods.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub rate_limit_base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn from_config(reliability: &ReliabilityConfig) -> Self {
        Self {
            base: Duration::from_millis(reliability.base_backoff_ms.max(50)),
            rate_limit_base: Duration::from_millis(reliability.rate_limit_backoff_ms.max(50)),
            max: Duration::from_millis(reliability.max_backoff_ms.max(100)),
        }
    }

    /// Delay before the next attempt: `base * 2^min(failures, cap)` with
    /// uniform ±20% jitter, clamped to the ceiling.
    pub fn next_delay(&self, state: &BackoffState, classification: &Classification) -> Duration {
        let (base, hint) = match classification {
            Classification::RateLimit { retry_after } => (self.rate_limit_base, *retry_after),
            _ => (self.base, None),
        };

        let exponent = state.consecutive_failures.saturating_sub(1).min(EXPONENT_CAP);
        let unjittered = base.saturating_mul(1u32 << exponent).min(self.max);

        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let jittered = unjittered.mul_f64(1.0 + jitter).min(self.max);

        match hint {
            Some(retry_after) => jittered.max(retry_after).min(self.max),
            None => jittered,
        }
    }
}

/// Consecutive-failure counter for one logical operation stream.
///
/// Independent streams (network checks, API calls) each keep their own state;
/// any success resets the counter to zero.
#[derive(Debug, Clone, Default)]
pub struct BackoffState {
    consecutive_failures: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1_000),
            rate_limit_base: Duration::from_millis(10_000),
            max: Duration::from_secs(120),
        }
    }

    fn delay_after_failures(policy: &BackoffPolicy, n: u32, class: &Classification) -> Duration {
        let mut state = BackoffState::new();
        for _ in 0..n {
            state.record_failure();
        }
        policy.next_delay(&state, class)
    }

    #[test]
    fn nominal_delay_is_monotonically_non_decreasing_up_to_cap() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for n in 1..=EXPONENT_CAP + 3 {
            let exponent = (n - 1).min(EXPONENT_CAP);
            let nominal = policy.base.saturating_mul(1u32 << exponent).min(policy.max);
            assert!(nominal >= previous, "failures={n}");
            previous = nominal;
        }
    }

    #[test]
    fn sampled_delay_stays_within_jitter_band() {
        let policy = policy();
        for n in 1..=EXPONENT_CAP + 3 {
            let exponent = (n - 1).min(EXPONENT_CAP);
            let nominal = policy.base.saturating_mul(1u32 << exponent).min(policy.max);
            let lower = nominal.mul_f64(1.0 - JITTER_FRACTION);
            let upper = nominal.mul_f64(1.0 + JITTER_FRACTION).min(policy.max);

            for _ in 0..16 {
                let sampled = delay_after_failures(&policy, n, &Classification::Transient);
                assert!(sampled >= lower, "failures={n}");
                assert!(sampled <= upper, "failures={n}");
            }
        }
    }

    #[test]
    fn delay_never_exceeds_ceiling() {
        let policy = policy();
        for n in 1..=32 {
            let d = delay_after_failures(&policy, n, &Classification::Transient);
            assert!(d <= policy.max);
        }
    }

    #[test]
    fn rate_limit_uses_longer_base() {
        let policy = policy();
        let transient = delay_after_failures(&policy, 1, &Classification::Transient);
        let rate_limited =
            delay_after_failures(&policy, 1, &Classification::RateLimit { retry_after: None });
        assert!(rate_limited > transient);
    }

    #[test]
    fn retry_after_hint_raises_delay() {
        let policy = policy();
        let hinted = delay_after_failures(
            &policy,
            1,
            &Classification::RateLimit {
                retry_after: Some(Duration::from_secs(90)),
            },
        );
        assert!(hinted >= Duration::from_secs(90));
        assert!(hinted <= policy.max);
    }

    #[test]
    fn success_resets_counter() {
        let mut state = BackoffState::new();
        state.record_failure();
        state.record_failure();
        assert_eq!(state.consecutive_failures(), 2);
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);

        // Next failure starts back at the base delay band.
        state.record_failure();
        let policy = policy();
        let d = policy.next_delay(&state, &Classification::Transient);
        assert!(d <= policy.base.mul_f64(1.0 + JITTER_FRACTION));
    }
}
