//! Sliding-window circuit breaker
//!
//! Tracks recent authentication outcomes in a rolling time window and trips
//! open when the failure rate crosses a threshold. Recovery is autonomous:
//! after the break duration the breaker admits probe traffic (half-open) and
//! closes again after enough consecutive successes.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Consecutive successes required to close the circuit from half-open
pub const HALF_OPEN_MAX_REQUESTS: u32 = 3;

/// Logical state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are admitted and outcomes tracked
    Closed,
    /// Requests are rejected
    Open,
    /// Probe traffic is admitted to test recovery
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    records: Vec<(Instant, bool)>,
    last_state_change: Instant,
    consecutive_successes: u32,
}

/// Sliding-window circuit breaker shared by both frontends
///
/// The open-to-half-open transition is lazy: once the break duration has
/// elapsed, observation methods report half-open (and admission resumes),
/// but the stored state only changes when the next outcome is recorded.
/// This keeps the read path free of writes.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: f64,
    window_size: Duration,
    min_requests: usize,
    break_duration: Duration,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state
    pub fn new(
        failure_threshold_percent: u32,
        window_size: Duration,
        min_requests: usize,
        break_duration: Duration,
    ) -> Self {
        CircuitBreaker {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                records: Vec::new(),
                last_state_change: Instant::now(),
                consecutive_successes: 0,
            }),
            failure_threshold: f64::from(failure_threshold_percent),
            window_size,
            min_requests,
            break_duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether admission should be rejected right now
    ///
    /// Returns false once the break duration has elapsed so that the next
    /// traffic is admitted and commits the half-open transition.
    pub fn is_open(&self) -> bool {
        let inner = self.lock();
        inner.state == BreakerState::Open
            && inner.last_state_change.elapsed() < self.break_duration
    }

    /// Current logical state, including the time-based open-to-half-open
    /// transition; pure observation
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        if inner.state == BreakerState::Open
            && inner.last_state_change.elapsed() >= self.break_duration
        {
            return BreakerState::HalfOpen;
        }
        inner.state
    }

    /// Record a successful outcome
    pub fn record_success(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.records.push((now, true));

        if self.logically_half_open(&inner) {
            if inner.state == BreakerState::Open {
                // Commit the lazy transition on the first probe outcome
                inner.state = BreakerState::HalfOpen;
                inner.last_state_change = now;
            }
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= HALF_OPEN_MAX_REQUESTS {
                inner.state = BreakerState::Closed;
                inner.last_state_change = now;
                inner.consecutive_successes = 0;
            }
        }

        self.prune(&mut inner, now);
    }

    /// Record a failed outcome
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.records.push((now, false));

        // A failing probe reopens the circuit immediately
        if self.logically_half_open(&inner) {
            inner.state = BreakerState::Open;
            inner.last_state_change = now;
            inner.consecutive_successes = 0;
            self.prune(&mut inner, now);
            return;
        }

        self.prune(&mut inner, now);
        if inner.state == BreakerState::Closed && self.should_open(&inner) {
            inner.state = BreakerState::Open;
            inner.last_state_change = now;
        }
    }

    /// Window snapshot: total outcomes, failures, failure percentage
    pub fn stats(&self) -> (usize, usize, f64) {
        let inner = self.lock();
        let total = inner.records.len();
        if total == 0 {
            return (0, 0, 0.0);
        }

        let failures = inner.records.iter().filter(|(_, ok)| !ok).count();
        let rate = failures as f64 * 100.0 / total as f64;
        (total, failures, rate)
    }

    /// Whether the committed-or-elapsed state is half-open
    fn logically_half_open(&self, inner: &BreakerInner) -> bool {
        inner.state == BreakerState::HalfOpen
            || (inner.state == BreakerState::Open
                && inner.last_state_change.elapsed() >= self.break_duration)
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        let total = inner.records.len();
        if total < self.min_requests {
            return false;
        }

        let failures = inner.records.iter().filter(|(_, ok)| !ok).count();
        let failure_percent = failures as f64 * 100.0 / total as f64;
        failure_percent >= self.failure_threshold
    }

    /// Drop records that fell out of the rolling window
    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        let window = self.window_size;
        inner
            .records
            .retain(|(ts, _)| now.duration_since(*ts) < window);
    }
}
