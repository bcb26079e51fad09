//! Exponential retry policies with jitter, caps, and multi-phase
//! composition.
//!
//! A policy is a pure computation from `(elapsed, attempts)` to the next
//! delay, where `None` means stop retrying. The [`Retrier`] wraps a policy
//! with a clock and an attempt counter for callers that retry an operation
//! in a loop.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::core::SchedulerError;
use crate::util::TimeSource;

const DEFAULT_BACKOFF_COEFFICIENT: f64 = 2.0;
const DEFAULT_MAXIMUM_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_EXPIRATION_INTERVAL: Duration = Duration::from_secs(60);

/// A retry delay computation.
///
/// `None` is the "done" sentinel: callers must stop retrying.
pub trait RetryPolicy: Send + Sync {
    /// Compute the delay before the next attempt, given wall time elapsed
    /// since the first attempt and the number of attempts made so far.
    fn compute_next_delay(&self, elapsed: Duration, attempts: usize) -> Option<Duration>;
}

/// Retry policy computing delays as `initial_interval *
/// backoff_coefficient^attempts`, clamped and jittered.
///
/// The computed delay is capped by `maximum_interval`, never extends past
/// the `expiration_interval` wall-clock budget, and carries
/// `0.8*delay + uniform[0, 0.2*delay)` jitter to break caller
/// synchronization while keeping an effective lower bound.
#[derive(Debug, Clone)]
pub struct ExponentialRetryPolicy {
    initial_interval: Duration,
    backoff_coefficient: f64,
    maximum_interval: Option<Duration>,
    expiration_interval: Option<Duration>,
    maximum_attempts: Option<usize>,
}

impl ExponentialRetryPolicy {
    /// Create a policy with the given initial interval and defaults for
    /// everything else: coefficient 2.0, maximum interval 10s, expiration
    /// interval 60s, unbounded attempts.
    #[must_use]
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
            maximum_interval: Some(DEFAULT_MAXIMUM_INTERVAL),
            expiration_interval: Some(DEFAULT_EXPIRATION_INTERVAL),
            maximum_attempts: None,
        }
    }

    /// Set the multiplier applied per attempt.
    #[must_use]
    pub fn with_backoff_coefficient(mut self, backoff_coefficient: f64) -> Self {
        self.backoff_coefficient = backoff_coefficient;
        self
    }

    /// Set the cap on any single delay; `None` removes the cap.
    #[must_use]
    pub fn with_maximum_interval(mut self, maximum_interval: Option<Duration>) -> Self {
        self.maximum_interval = maximum_interval;
        self
    }

    /// Set the wall-clock budget after which retries stop; `None` removes
    /// the budget.
    #[must_use]
    pub fn with_expiration_interval(mut self, expiration_interval: Option<Duration>) -> Self {
        self.expiration_interval = expiration_interval;
        self
    }

    /// Set the attempt budget; `None` means unbounded.
    #[must_use]
    pub fn with_maximum_attempts(mut self, maximum_attempts: Option<usize>) -> Self {
        self.maximum_attempts = maximum_attempts;
        self
    }

    pub(crate) fn maximum_attempts(&self) -> Option<usize> {
        self.maximum_attempts
    }
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn compute_next_delay(&self, elapsed: Duration, attempts: usize) -> Option<Duration> {
        if let Some(maximum_attempts) = self.maximum_attempts {
            if attempts >= maximum_attempts {
                return None;
            }
        }

        if let Some(expiration) = self.expiration_interval {
            if elapsed > expiration {
                return None;
            }
        }

        let mut next_interval = self.initial_interval.as_nanos() as f64
            * self.backoff_coefficient.powf(attempts as f64);
        // Disallow retries if the initial interval is zero or the product
        // went non-positive (negative coefficient).
        if next_interval <= 0.0 {
            return None;
        }
        if let Some(maximum) = self.maximum_interval {
            next_interval = next_interval.min(maximum.as_nanos() as f64);
        }

        if let Some(expiration) = self.expiration_interval {
            let remaining =
                (expiration.as_nanos() as f64 - elapsed.as_nanos() as f64).max(0.0);
            next_interval = next_interval.min(remaining);
        }

        // Bail out if the next interval dropped below the initial retry
        // interval: the remaining budget is too small to be meaningful.
        if (next_interval as u128) < self.initial_interval.as_nanos() {
            return None;
        }

        // Jitter to avoid global synchronization.
        let jitter_portion = ((0.2 * next_interval) as u64).max(1);
        let jittered =
            next_interval * 0.8 + rand::thread_rng().gen_range(0..jitter_portion) as f64;

        Some(Duration::from_nanos(jittered as u64))
    }
}

/// Composition of exponential policies evaluated phase by phase.
///
/// Each phase serves the attempts left over after all earlier phases
/// exhausted their attempt budgets, enabling fast retries first and slow
/// retries later.
pub struct MultiPhasesRetryPolicy {
    phases: Vec<ExponentialRetryPolicy>,
}

impl MultiPhasesRetryPolicy {
    /// Compose the given phases in order.
    ///
    /// # Errors
    ///
    /// Every phase except the final one must bound `maximum_attempts`;
    /// otherwise later phases would never be reached.
    pub fn new(phases: Vec<ExponentialRetryPolicy>) -> Result<Self, SchedulerError> {
        if phases.is_empty() {
            return Err(SchedulerError::InvalidRetryPolicy(
                "at least one phase is required".into(),
            ));
        }
        for phase in &phases[..phases.len() - 1] {
            if phase.maximum_attempts().is_none() {
                return Err(SchedulerError::InvalidRetryPolicy(
                    "non-final phases must set maximum attempts".into(),
                ));
            }
        }
        Ok(Self { phases })
    }
}

impl RetryPolicy for MultiPhasesRetryPolicy {
    fn compute_next_delay(&self, elapsed: Duration, attempts: usize) -> Option<Duration> {
        let mut consumed_attempts = 0;
        for phase in &self.phases {
            let phase_attempts = attempts.saturating_sub(consumed_attempts);
            if let Some(delay) = phase.compute_next_delay(elapsed, phase_attempts) {
                return Some(delay);
            }
            consumed_attempts += phase.maximum_attempts().unwrap_or(0);
        }
        None
    }
}

/// Stateful wrapper pairing a policy with a clock and an attempt counter.
pub struct Retrier {
    policy: Arc<dyn RetryPolicy>,
    time_source: Arc<dyn TimeSource>,
    start_time: std::time::Instant,
    current_attempt: usize,
}

impl Retrier {
    /// Create a retrier starting its elapsed-time window now.
    pub fn new(policy: Arc<dyn RetryPolicy>, time_source: Arc<dyn TimeSource>) -> Self {
        let start_time = time_source.now();
        Self {
            policy,
            time_source,
            start_time,
            current_attempt: 0,
        }
    }

    /// The delay before the next attempt, or `None` when retries are
    /// exhausted. Increments the attempt counter.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let elapsed = self
            .time_source
            .now()
            .saturating_duration_since(self.start_time);
        let next = self.policy.compute_next_delay(elapsed, self.current_attempt);
        self.current_attempt += 1;
        next
    }

    /// Reset to the initial state: zero attempts, fresh elapsed-time
    /// window.
    pub fn reset(&mut self) {
        self.start_time = self.time_source.now();
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_bounds(raw: Duration) -> (Duration, Duration) {
        // Delay is 0.8*raw + uniform[0, max(1, 0.2*raw)).
        (raw.mul_f64(0.8), raw)
    }

    #[test]
    fn test_first_attempt_within_jitter_window() {
        let policy = ExponentialRetryPolicy::new(Duration::from_millis(100));
        let delay = policy.compute_next_delay(Duration::ZERO, 0).unwrap();
        let (lo, hi) = no_jitter_bounds(Duration::from_millis(100));
        assert!(delay >= lo && delay < hi, "delay {delay:?} outside [{lo:?}, {hi:?})");
    }

    #[test]
    fn test_done_when_attempts_exhausted() {
        let policy = ExponentialRetryPolicy::new(Duration::from_millis(10))
            .with_maximum_attempts(Some(3));
        assert!(policy.compute_next_delay(Duration::ZERO, 2).is_some());
        assert!(policy.compute_next_delay(Duration::ZERO, 3).is_none());
        assert!(policy.compute_next_delay(Duration::ZERO, 10).is_none());
    }

    #[test]
    fn test_done_when_expired() {
        let policy = ExponentialRetryPolicy::new(Duration::from_millis(10))
            .with_expiration_interval(Some(Duration::from_secs(1)));
        assert!(policy
            .compute_next_delay(Duration::from_millis(1001), 0)
            .is_none());
        // At the boundary the remaining budget is zero, which also ends
        // retries via the sub-initial bailout.
        assert!(policy
            .compute_next_delay(Duration::from_secs(1), 0)
            .is_none());
        assert!(policy
            .compute_next_delay(Duration::from_millis(500), 0)
            .is_some());
    }

    #[test]
    fn test_done_on_zero_initial_interval() {
        let policy = ExponentialRetryPolicy::new(Duration::ZERO);
        assert!(policy.compute_next_delay(Duration::ZERO, 0).is_none());
    }

    #[test]
    fn test_remaining_budget_below_initial_is_done() {
        // 50ms of budget left but the initial interval is 100ms.
        let policy = ExponentialRetryPolicy::new(Duration::from_millis(100))
            .with_expiration_interval(Some(Duration::from_secs(60)));
        let elapsed = Duration::from_secs(60) - Duration::from_millis(50);
        assert!(policy.compute_next_delay(elapsed, 0).is_none());
    }

    #[test]
    fn test_multi_phase_requires_bounded_non_final_phases() {
        let unbounded = ExponentialRetryPolicy::new(Duration::from_millis(10));
        let bounded = ExponentialRetryPolicy::new(Duration::from_millis(10))
            .with_maximum_attempts(Some(2));

        assert!(MultiPhasesRetryPolicy::new(vec![unbounded.clone(), bounded.clone()]).is_err());
        assert!(MultiPhasesRetryPolicy::new(vec![]).is_err());
        assert!(MultiPhasesRetryPolicy::new(vec![bounded, unbounded]).is_ok());
    }

    #[test]
    fn test_retrier_increments_attempts_and_resets() {
        let clock = Arc::new(crate::util::MockTimeSource::new());
        let policy = Arc::new(
            ExponentialRetryPolicy::new(Duration::from_millis(100))
                .with_maximum_attempts(Some(2)),
        );
        let mut retrier = Retrier::new(policy, clock.clone());

        assert!(retrier.next_backoff().is_some());
        assert!(retrier.next_backoff().is_some());
        assert!(retrier.next_backoff().is_none());

        retrier.reset();
        assert!(retrier.next_backoff().is_some());
    }

    #[test]
    fn test_retrier_honors_expiration_via_clock() {
        let clock = Arc::new(crate::util::MockTimeSource::new());
        let policy = Arc::new(
            ExponentialRetryPolicy::new(Duration::from_millis(100))
                .with_expiration_interval(Some(Duration::from_secs(1))),
        );
        let mut retrier = Retrier::new(policy, clock.clone());

        assert!(retrier.next_backoff().is_some());
        clock.advance(Duration::from_secs(2));
        assert!(retrier.next_backoff().is_none());
    }
}
