//! Bounded retry policy with configurable backoff.
//!
//! Governs redelivery of failed tasks: how many attempts a task gets and
//! how long it waits between them. Jitter spreads retries of tasks that
//! failed together; tests set `jitter_factor` to zero for exact timings.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Strategy for growing the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows by `base_delay` per attempt.
    Linear,
    /// Delay doubles per attempt.
    Exponential,
}

/// Retry policy applied by the queue to failed tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts, counting the first one.
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Randomization factor in `[0.0, 1.0]` applied around the computed
    /// delay.
    pub jitter_factor: f64,

    /// How the delay grows across attempts.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(900),
            jitter_factor: 0.2,
            backoff: Backoff::Exponential,
        }
    }
}

/// What to do with a task whose attempt just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue, leasable again after the given delay.
    RetryAfter(Duration),
    /// Attempts exhausted; drop the task permanently.
    Discard,
}

impl RetryPolicy {
    /// Policy that never retries; each task gets exactly one attempt.
    pub fn no_retries() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Decides the fate of a task after `attempt` failed deliveries.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Discard;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt))
    }

    /// Delay before the attempt that follows failed attempt number
    /// `attempt` (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let grown = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };
        let capped = grown.min(self.max_delay);
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes a delay by up to `jitter_factor` in either direction.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(backoff: Backoff) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            jitter_factor: 0.0,
            backoff,
        }
    }

    #[test]
    fn exponential_delays_double_until_capped() {
        let policy = exact(Backoff::Exponential);
        let delays: Vec<_> = (1..=4)
            .map(|attempt| match policy.decide(attempt) {
                RetryDecision::RetryAfter(d) => d,
                RetryDecision::Discard => unreachable!("attempt {attempt} under max"),
            })
            .collect();
        assert_eq!(delays, vec![
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(40),
            Duration::from_secs(80),
        ]);
    }

    #[test]
    fn max_delay_caps_growth() {
        let mut policy = exact(Backoff::Exponential);
        policy.max_attempts = 20;
        match policy.decide(10) {
            RetryDecision::RetryAfter(d) => assert_eq!(d, Duration::from_secs(120)),
            RetryDecision::Discard => unreachable!(),
        }
    }

    #[test]
    fn linear_and_fixed_strategies() {
        let linear = exact(Backoff::Linear);
        assert_eq!(linear.decide(3), RetryDecision::RetryAfter(Duration::from_secs(30)));

        let fixed = exact(Backoff::Fixed);
        assert_eq!(fixed.decide(1), RetryDecision::RetryAfter(Duration::from_secs(10)));
        assert_eq!(fixed.decide(4), RetryDecision::RetryAfter(Duration::from_secs(10)));
    }

    #[test]
    fn attempts_exhaust_to_discard() {
        let policy = exact(Backoff::Exponential);
        assert_eq!(policy.decide(5), RetryDecision::Discard);
        assert_eq!(policy.decide(6), RetryDecision::Discard);
    }

    #[test]
    fn no_retries_policy_discards_after_first_attempt() {
        assert_eq!(RetryPolicy::no_retries().decide(1), RetryDecision::Discard);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(100);
        for _ in 0..50 {
            let jittered = apply_jitter(base, 0.25);
            assert!(jittered >= Duration::from_secs(75));
            assert!(jittered <= Duration::from_secs(125));
        }
    }
}
