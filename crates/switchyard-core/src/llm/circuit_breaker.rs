//! Per-provider circuit breaker.
//!
//! Tracks consecutive failures and shields a consistently failing provider
//! from traffic for a cooldown period. The policy is a pure function of the
//! breaker's own state: fixed threshold, fixed cooldown, no backoff.
//!
//! HalfOpen failures are counted exactly like Closed failures: they keep
//! incrementing the same counter, which is already past the threshold, so
//! the breaker reopens with a fresh `last_failure_at`.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use switchyard_types::status::{BreakerSnapshot, CircuitState};

/// Consecutive failures that open the circuit.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit blocks traffic before a probe is allowed.
pub const OPEN_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// Failure-tracking guard for one provider.
///
/// Each breaker has its own lock, so a failure in one provider never blocks
/// availability checks on another.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Create a Closed breaker with the standard policy.
    pub fn new() -> Self {
        Self::with_policy(FAILURE_THRESHOLD, OPEN_COOLDOWN)
    }

    /// Create a Closed breaker with a custom threshold and cooldown.
    pub fn with_policy(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Whether an attempt may be made now.
    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Instant::now())
    }

    /// Availability check at an explicit instant.
    ///
    /// An Open breaker whose cooldown has strictly elapsed moves to HalfOpen
    /// and reports usable.
    pub fn is_usable_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .is_none_or(|at| now.saturating_duration_since(at) > self.cooldown);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    tracing::debug!(
                        failures = inner.consecutive_failures,
                        "Circuit cooldown elapsed, probing"
                    );
                }
                cooled_down
            }
        }
    }

    /// Whether [`is_usable`](Self::is_usable) would admit an attempt now,
    /// without moving an Open breaker to HalfOpen.
    pub fn would_admit(&self) -> bool {
        self.would_admit_at(Instant::now())
    }

    pub fn would_admit_at(&self, now: Instant) -> bool {
        let inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => inner
                .last_failure_at
                .is_none_or(|at| now.saturating_duration_since(at) > self.cooldown),
        }
    }

    /// Record a successful attempt: reset to Closed regardless of prior state.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failed attempt at an explicit instant.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(now);
        if inner.consecutive_failures >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    failures = inner.consecutive_failures,
                    "Circuit opened"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker lock poisoned").state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("circuit breaker lock poisoned")
            .consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("circuit breaker lock poisoned");
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_n(breaker: &CircuitBreaker, n: u32, at: Instant) {
        for _ in 0..n {
            breaker.record_failure_at(at);
        }
    }

    #[test]
    fn test_new_breaker_is_closed() {
        let breaker = CircuitBreaker::new();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.is_usable());
    }

    #[test]
    fn test_four_failures_still_usable() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 4, now);
        assert!(breaker.is_usable_at(now));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_five_failures() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 5, now);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_usable_at(now));
        assert!(!breaker.is_usable_at(now + Duration::from_secs(59)));
    }

    #[test]
    fn test_cooldown_must_strictly_elapse() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 5, now);
        assert!(!breaker.is_usable_at(now + OPEN_COOLDOWN));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_cooldown_moves_to_half_open_once() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 5, now);

        let later = now + Duration::from_secs(61);
        assert!(breaker.is_usable_at(later));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // HalfOpen stays usable until the probe outcome is recorded.
        assert!(breaker.is_usable_at(later));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens_with_same_counter() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 5, now);

        let probe_at = now + Duration::from_secs(61);
        assert!(breaker.is_usable_at(probe_at));
        breaker.record_failure_at(probe_at);

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 6);
        assert!(!breaker.is_usable_at(probe_at + Duration::from_secs(30)));
        assert!(breaker.is_usable_at(probe_at + Duration::from_secs(61)));
    }

    #[test]
    fn test_success_resets_from_any_state() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();

        fail_n(&breaker, 3, now);
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail_n(&breaker, 5, now);
        assert!(breaker.is_usable_at(now + Duration::from_secs(61)));
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);

        fail_n(&breaker, 5, now);
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failure_count_restarts_after_success() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 4, now);
        breaker.record_success();
        fail_n(&breaker, 4, now);
        assert!(breaker.is_usable_at(now));
    }

    #[test]
    fn test_custom_policy() {
        let breaker = CircuitBreaker::with_policy(2, Duration::from_secs(5));
        let now = Instant::now();
        fail_n(&breaker, 2, now);
        assert!(!breaker.is_usable_at(now + Duration::from_secs(5)));
        assert!(breaker.is_usable_at(now + Duration::from_secs(6)));
    }

    #[test]
    fn test_would_admit_leaves_open_state_alone() {
        let breaker = CircuitBreaker::new();
        let now = Instant::now();
        fail_n(&breaker, 5, now);

        assert!(!breaker.would_admit_at(now + Duration::from_secs(30)));
        assert!(breaker.would_admit_at(now + Duration::from_secs(61)));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 5);
    }

    #[test]
    fn test_snapshot() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure();
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 1);
    }
}
