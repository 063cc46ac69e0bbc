//! Jittered exponential reconnect delay.
//!
//! ```text
//! delay = min(max_delay, (2^attempt - 1) * 0.5 * multiplier * jitter)
//! jitter ∈ uniform(0.8, 1.2)
//! ```
//!
//! With the design values (`multiplier = 2`, `max_delay = 60 s`) the
//! pre-jitter curve is 0 s, 1 s, 3 s, 7 s, 15 s, 31 s, then 60 s forever.
//! Retries are unbounded; only the delay is clamped.

use std::time::Duration;

use rand::Rng;

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.8;
/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.2;

/// Shape of the reconnect curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Multiplier applied to the exponential term.
    pub multiplier: f64,
    /// Hard ceiling on any computed delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Pre-jitter delay in seconds for `attempt`. Unclamped.
#[must_use]
pub fn base_delay_secs(attempt: u32, multiplier: f64) -> f64 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    (2f64.powi(exponent) - 1.0) * 0.5 * multiplier
}

/// Computes the delay for `attempt` with an explicit `jitter` factor.
///
/// The result never exceeds `policy.max_delay`.
#[must_use]
pub fn compute_delay(attempt: u32, policy: BackoffPolicy, jitter: f64) -> Duration {
    let max = policy.max_delay.as_secs_f64();
    let secs = (base_delay_secs(attempt, policy.multiplier) * jitter)
        .min(max)
        .max(0.0);
    Duration::from_secs_f64(secs)
}

/// Retry bookkeeping for one connection manager.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Creates a calculator at attempt 0.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of failed cycles since the last link that carried traffic.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called once a link has proven itself.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the delay for the current attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        let delay = compute_delay(self.attempt, self.policy, jitter);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_is_immediate() {
        let policy = BackoffPolicy::default();
        assert_eq!(compute_delay(0, policy, JITTER_MAX), Duration::ZERO);
    }

    #[test]
    fn delay_never_exceeds_max() {
        let policy = BackoffPolicy::default();
        for attempt in (0..200).chain([u32::MAX - 1, u32::MAX]) {
            for jitter in [JITTER_MIN, 1.0, JITTER_MAX] {
                assert!(compute_delay(attempt, policy, jitter) <= policy.max_delay);
            }
        }
    }

    #[test]
    fn pre_jitter_curve_is_non_decreasing() {
        let mut previous = 0.0;
        for attempt in 0..64 {
            let current = base_delay_secs(attempt, 2.0);
            assert!(current >= previous, "attempt {attempt}");
            previous = current;
        }
    }

    #[test]
    fn design_curve_values() {
        let policy = BackoffPolicy::default();
        let secs: Vec<u64> = (0..8)
            .map(|a| compute_delay(a, policy, 1.0).as_secs())
            .collect();
        assert_eq!(secs, vec![0, 1, 3, 7, 15, 31, 60, 60]);
    }

    #[test]
    fn next_delay_advances_and_reset_rewinds() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(800) && second <= Duration::from_millis(1200));
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn unbounded_attempts_stay_clamped() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        for _ in 0..1000 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
        assert_eq!(backoff.attempt(), 1000);
    }
}
