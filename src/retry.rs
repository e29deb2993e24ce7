//! Backoff and jitter scheduling for retries.
//!
//! Two delays are used by the executor: exponential backoff for 5xx and
//! transport failures, and a `Retry-After`-derived delay for 429s. Both are
//! jittered by ±20% and slept through a cancellable timer.

use crate::{Error, Result};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Base delay used when the configured one is zero.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Computes `base * 2^(attempt-1)`, clamped to `max`.
///
/// The clamp is checked before every doubling step, so the result never
/// exceeds `max` (a zero `max` disables the clamp). A zero `base` is treated
/// as one second. `attempt` is 1-indexed; zero behaves like one.
///
/// # Examples
///
/// ```
/// use instantly::retry::exponential_delay;
/// use std::time::Duration;
///
/// let base = Duration::from_millis(100);
/// let max = Duration::from_secs(1);
/// assert_eq!(exponential_delay(base, max, 1), Duration::from_millis(100));
/// assert_eq!(exponential_delay(base, max, 3), Duration::from_millis(400));
/// assert_eq!(exponential_delay(base, max, 10), max);
/// ```
pub fn exponential_delay(base: Duration, max: Duration, attempt: usize) -> Duration {
    let mut delay = if base.is_zero() {
        DEFAULT_BASE_DELAY
    } else {
        base
    };

    for _ in 1..attempt.max(1) {
        if !max.is_zero() && delay >= max {
            return max;
        }
        delay = delay.checked_mul(2).unwrap_or(Duration::MAX);
    }

    if !max.is_zero() && delay >= max {
        max
    } else {
        delay
    }
}

/// Source of randomness for jitter.
///
/// Injected into the [`Scheduler`] so tests can make sleeps deterministic.
pub trait JitterSource: Send + Sync {
    /// Returns a uniformly distributed value in `0..=bound`.
    fn offset(&self, bound: u64) -> u64;

    /// Returns `true` to subtract the offset, `false` to add it.
    fn subtract(&self) -> bool;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn offset(&self, bound: u64) -> u64 {
        rand::thread_rng().gen_range(0..=bound)
    }

    fn subtract(&self) -> bool {
        rand::thread_rng().gen_bool(0.5)
    }
}

/// Jitter that always returns a fixed offset and direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter {
    /// Offset in nanoseconds, clamped to the bound.
    pub offset: u64,
    /// Whether the offset is subtracted.
    pub subtract: bool,
}

impl JitterSource for FixedJitter {
    fn offset(&self, bound: u64) -> u64 {
        self.offset.min(bound)
    }

    fn subtract(&self) -> bool {
        self.subtract
    }
}

/// Computes jittered delays and sleeps them under a cancellation signal.
#[derive(Clone)]
pub struct Scheduler {
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRngJitter))
    }
}

impl Scheduler {
    /// Creates a scheduler drawing jitter from `jitter`.
    pub fn new(jitter: Arc<dyn JitterSource>) -> Self {
        Self { jitter }
    }

    /// Applies ±20% jitter to `delay`.
    ///
    /// The offset is drawn uniformly from `0..=delay/5` and added or
    /// subtracted with equal probability. A zero delay stays zero.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if delay.is_zero() {
            return delay;
        }
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let offset = Duration::from_nanos(self.jitter.offset(nanos / 5));
        if self.jitter.subtract() {
            delay.saturating_sub(offset)
        } else {
            delay.saturating_add(offset)
        }
    }

    /// Sleeps for a jittered `delay` unless `cancel` fires first.
    ///
    /// A zero delay returns immediately, even if `cancel` has already fired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token is cancelled before the
    /// timer elapses.
    pub async fn sleep_with_jitter(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }
        let delay = self.jittered(delay);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Sleeps for the jittered exponential delay of `attempt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token is cancelled first.
    pub async fn sleep_with_backoff(
        &self,
        base: Duration,
        max: Duration,
        attempt: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.sleep_with_jitter(exponential_delay(base, max, attempt), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_delays() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);

        assert_eq!(exponential_delay(base, max, 1), Duration::from_millis(100));
        assert_eq!(exponential_delay(base, max, 2), Duration::from_millis(200));
        assert_eq!(exponential_delay(base, max, 3), Duration::from_millis(400));
        assert_eq!(exponential_delay(base, max, 4), Duration::from_millis(800));
        assert_eq!(exponential_delay(base, max, 5), Duration::from_millis(1600));
        assert_eq!(exponential_delay(base, max, 20), max);
    }

    #[test]
    fn test_zero_base_is_one_second() {
        assert_eq!(
            exponential_delay(Duration::ZERO, Duration::ZERO, 1),
            Duration::from_secs(1)
        );
        assert_eq!(
            exponential_delay(Duration::ZERO, Duration::ZERO, 3),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_backoff_monotonic_and_bounded() {
        for base_ms in [1u64, 7, 250, 1000, 45_000] {
            for max_ms in [1u64, 500, 30_000] {
                let base = Duration::from_millis(base_ms);
                let max = Duration::from_millis(max_ms);
                let mut previous = Duration::ZERO;
                for attempt in 1..=80 {
                    let delay = exponential_delay(base, max, attempt);
                    assert!(delay >= previous, "attempt {attempt} went backwards");
                    assert!(delay <= max, "attempt {attempt} exceeded max");
                    previous = delay;
                }
            }
        }
    }

    #[test]
    fn test_backoff_without_cap_saturates() {
        let delay = exponential_delay(Duration::from_secs(1), Duration::ZERO, 200);
        assert_eq!(delay, Duration::MAX);
    }

    #[test]
    fn test_fixed_jitter_both_directions() {
        let d = Duration::from_millis(100);
        let up = Scheduler::new(Arc::new(FixedJitter {
            offset: u64::MAX,
            subtract: false,
        }));
        let down = Scheduler::new(Arc::new(FixedJitter {
            offset: u64::MAX,
            subtract: true,
        }));
        assert_eq!(up.jittered(d), Duration::from_millis(120));
        assert_eq!(down.jittered(d), Duration::from_millis(80));

        let none = Scheduler::new(Arc::new(FixedJitter::default()));
        assert_eq!(none.jittered(d), d);
    }

    #[test]
    fn test_random_jitter_within_twenty_percent() {
        let scheduler = Scheduler::default();
        let d = Duration::from_millis(500);
        for _ in 0..1000 {
            let j = scheduler.jittered(d);
            assert!(j >= Duration::from_millis(400) && j <= Duration::from_millis(600));
        }
        assert_eq!(scheduler.jittered(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_delay_is_noop_even_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = Scheduler::default();
        assert!(scheduler
            .sleep_with_jitter(Duration::ZERO, &cancel)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_sleep_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = Scheduler::new(Arc::new(FixedJitter::default()));

        let err = scheduler
            .sleep_with_jitter(Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let err = scheduler
            .sleep_with_backoff(Duration::ZERO, Duration::ZERO, 1, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_short_sleep_completes() {
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::default();
        scheduler
            .sleep_with_backoff(Duration::from_millis(1), Duration::from_millis(2), 2, &cancel)
            .await
            .unwrap();
    }
}
