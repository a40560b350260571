//! Circuit breaker gating upstream poem fetches.
//!
//! Opens after `threshold` consecutive failures and closes again once
//! `cooldown` has passed since the last failure. There is no half-open probe:
//! the breaker only answers "may I try now?" and never schedules retries.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub consecutive_failures: u32,
    pub is_open: bool,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn should_attempt(&self) -> bool {
        self.should_attempt_at(Instant::now())
    }

    pub fn should_attempt_at(&self, now: Instant) -> bool {
        let state = self.state.lock();
        !self.is_open_locked(&state, now)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_failures > 0 {
            info!(
                failures = state.consecutive_failures,
                "breaker_reset_on_success"
            );
        }
        *state = BreakerState::default();
    }

    /// Returns true when this failure reached the threshold; the caller
    /// should switch the feed into degraded mode.
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(now);
        let tripped = state.consecutive_failures >= self.threshold;
        if tripped {
            warn!(
                failures = state.consecutive_failures,
                cooldown_s = self.cooldown.as_secs(),
                "breaker_open"
            );
        }
        tripped
    }

    /// Clears counters; used when a feed session is refreshed.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::default();
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            consecutive_failures: state.consecutive_failures,
            is_open: self.is_open_locked(&state, now),
        }
    }

    fn is_open_locked(&self, state: &BreakerState, now: Instant) -> bool {
        if state.consecutive_failures < self.threshold {
            return false;
        }
        match state.last_failure {
            Some(at) => now.saturating_duration_since(at) <= self.cooldown,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(600);

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        let t0 = Instant::now();
        for i in 0..4 {
            assert!(!breaker.record_failure_at(t0), "failure {i} tripped early");
            assert!(breaker.should_attempt_at(t0));
        }
        assert!(breaker.record_failure_at(t0));
        assert!(!breaker.should_attempt_at(t0));
        assert!(breaker.snapshot_at(t0).is_open);
    }

    #[test]
    fn closes_after_cooldown_without_success() {
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        let t0 = Instant::now();
        for _ in 0..5 {
            breaker.record_failure_at(t0);
        }
        assert!(!breaker.should_attempt_at(t0 + Duration::from_secs(599)));
        assert!(breaker.should_attempt_at(t0 + COOLDOWN + Duration::from_secs(1)));
        assert_eq!(
            breaker.snapshot_at(t0 + COOLDOWN + Duration::from_secs(1)),
            BreakerSnapshot {
                consecutive_failures: 5,
                is_open: false
            }
        );
    }

    #[test]
    fn success_resets_counter() {
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
        assert!(!breaker.record_failure());
    }

    #[test]
    fn failure_after_cooldown_reopens_immediately() {
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        let t0 = Instant::now();
        for _ in 0..5 {
            breaker.record_failure_at(t0);
        }
        let later = t0 + COOLDOWN * 2;
        assert!(breaker.should_attempt_at(later));
        assert!(breaker.record_failure_at(later));
        assert!(!breaker.should_attempt_at(later));
    }
}
