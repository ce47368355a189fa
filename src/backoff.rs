//! Exponential backoff with jitter and a wall-clock ceiling.

use crate::retry::DecodedError;
use rand::Rng;
use std::time::Duration;

/// Default ceiling on the total time a request may spend, including waits.
pub const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_millis(15_000);

/// Default backoff unit. The n-th retry waits `2^n` units plus up to one unit of jitter.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);

/// Source of the random addition to each delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Uniformly random in `[0, base)`.
    #[default]
    Random,

    /// Always the given amount. Useful for deterministic behavior in tests.
    Fixed(Duration),
}

/// What the policy decided for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait this long, then try again.
    Delay(Duration),
    /// Waiting would exceed the budget; stop retrying.
    Abort,
}

/// Computes how long to wait before the next attempt.
///
/// The delay for attempt `n` is `2^n * base + jitter`. If the time already
/// spent plus that delay would exceed the budget, the policy aborts instead.
///
/// # Examples
///
/// ```
/// use gridcall::backoff::{Backoff, BackoffPolicy, Jitter};
/// use gridcall::DecodedError;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::default().with_jitter(Jitter::Fixed(Duration::ZERO));
/// let error = DecodedError::new(4002, "Server timeout exceeded.");
///
/// assert_eq!(
///     policy.decide(1, Duration::ZERO, &error),
///     Backoff::Delay(Duration::from_secs(2))
/// );
/// assert_eq!(
///     policy.decide(3, Duration::from_secs(10), &error),
///     Backoff::Abort
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    budget: Duration,
    base: Duration,
    jitter: Jitter,
}

impl BackoffPolicy {
    /// Creates a policy with the given total budget and default base and jitter.
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            base: DEFAULT_BACKOFF_BASE,
            jitter: Jitter::Random,
        }
    }

    /// Sets the backoff unit.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the jitter source.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// The total time budget.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Decides the wait before retry number `attempt` (1-indexed).
    pub fn decide(&self, attempt: usize, elapsed: Duration, error: &DecodedError) -> Backoff {
        let Some(delay) = self.delay_for(attempt) else {
            return Backoff::Abort;
        };

        match elapsed.checked_add(delay) {
            Some(total) if total <= self.budget => {
                tracing::trace!(
                    attempt = attempt,
                    error_code = error.code,
                    delay_ms = delay.as_millis() as u64,
                    "backoff delay computed"
                );
                Backoff::Delay(delay)
            }
            _ => Backoff::Abort,
        }
    }

    fn delay_for(&self, attempt: usize) -> Option<Duration> {
        let exponent = u32::try_from(attempt).ok()?;
        let multiplier = 1u32.checked_shl(exponent)?;
        let base = self.base.checked_mul(multiplier)?;
        base.checked_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        match self.jitter {
            Jitter::Fixed(amount) => amount,
            Jitter::Random => {
                let upper = self.base.as_nanos().min(u64::MAX as u128) as u64;
                if upper == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_nanos(rand::thread_rng().gen_range(0..upper))
                }
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRY_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_error() -> DecodedError {
        DecodedError::new(4002, "Server timeout exceeded. Request has failed.")
    }

    #[test]
    fn test_delays_stay_in_jitter_window() {
        let policy = BackoffPolicy::new(Duration::from_secs(3_600));
        let error = timeout_error();

        for attempt in 1..=10usize {
            let floor = Duration::from_millis((1u64 << attempt) * 1_000);
            let ceiling = floor + Duration::from_millis(1_000);
            for _ in 0..50 {
                match policy.decide(attempt, Duration::ZERO, &error) {
                    Backoff::Delay(delay) => {
                        assert!(
                            delay >= floor && delay < ceiling,
                            "attempt {attempt}: {delay:?}"
                        );
                    }
                    Backoff::Abort => panic!("attempt {attempt} should fit a one hour budget"),
                }
            }
        }
    }

    #[test]
    fn test_abort_when_delay_exceeds_budget() {
        let policy = BackoffPolicy::default();
        let error = timeout_error();

        for attempt in 1..=10usize {
            let floor = Duration::from_millis((1u64 << attempt) * 1_000);
            match policy.decide(attempt, Duration::ZERO, &error) {
                Backoff::Delay(delay) => {
                    assert!(delay <= policy.budget());
                    assert!(delay >= floor);
                }
                Backoff::Abort => {
                    assert!(floor + Duration::from_millis(1_000) > policy.budget());
                }
            }
        }

        assert_eq!(policy.decide(4, Duration::ZERO, &error), Backoff::Abort);
    }

    #[test]
    fn test_elapsed_time_counts_against_budget() {
        let policy =
            BackoffPolicy::default().with_jitter(Jitter::Fixed(Duration::from_millis(500)));
        let error = timeout_error();

        assert_eq!(
            policy.decide(2, Duration::from_millis(10_500), &error),
            Backoff::Delay(Duration::from_millis(4_500))
        );
        assert_eq!(
            policy.decide(2, Duration::from_millis(10_501), &error),
            Backoff::Abort
        );
    }

    #[test]
    fn test_fixed_jitter_is_deterministic() {
        let policy =
            BackoffPolicy::default().with_jitter(Jitter::Fixed(Duration::from_millis(250)));
        let error = timeout_error();
        let first = policy.decide(2, Duration::from_millis(3_000), &error);
        let second = policy.decide(2, Duration::from_millis(3_000), &error);
        assert_eq!(first, second);
        assert_eq!(first, Backoff::Delay(Duration::from_millis(4_250)));
    }

    #[test]
    fn test_huge_attempt_aborts_instead_of_overflowing() {
        let policy = BackoffPolicy::new(Duration::MAX);
        assert_eq!(
            policy.decide(usize::MAX, Duration::ZERO, &timeout_error()),
            Backoff::Abort
        );
        assert_eq!(policy.decide(64, Duration::ZERO, &timeout_error()), Backoff::Abort);
    }

    #[test]
    fn test_custom_base() {
        let policy = BackoffPolicy::default()
            .with_base(Duration::from_millis(10))
            .with_jitter(Jitter::Fixed(Duration::ZERO));
        assert_eq!(
            policy.decide(3, Duration::ZERO, &timeout_error()),
            Backoff::Delay(Duration::from_millis(80))
        );
    }
}
