//! Circuit breaker implementation
//!
//! Two states only: Closed and Open. There is no half-open state; once the
//! cooldown window elapses, the next call is let through and its outcome
//! decides whether the circuit closes or stays open.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    is_open: bool,
}

/// Per-downstream-service circuit breaker.
///
/// One instance per (process, service name) pair; the name is the stable
/// key used for both circuit state and log correlation.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the named service.
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a call may go out on the network right now.
    ///
    /// An open circuit rejects until the cooldown elapses; after that the
    /// call is allowed as a probe while the circuit stays marked open.
    pub fn can_proceed(&self) -> bool {
        let state = self.state.lock();
        if !state.is_open {
            return true;
        }
        match state.last_failure {
            Some(at) if at.elapsed() >= self.cooldown => {
                tracing::debug!(service = %self.name, "Cooldown elapsed, allowing probe call");
                true
            }
            _ => {
                warn!(service = %self.name, "Circuit open, rejecting call");
                false
            }
        }
    }

    /// Record a call that ultimately succeeded (after any retries).
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.is_open {
            info!(service = %self.name, "Circuit breaker closed after successful probe");
        }
        state.consecutive_failures = 0;
        state.is_open = false;
    }

    /// Record a call that failed after exhausting its retry budget.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());
        if !state.is_open && state.consecutive_failures >= self.failure_threshold {
            state.is_open = true;
            warn!(
                service = %self.name,
                failures = state.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Whether the circuit is currently open.
    pub fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    /// Current consecutive-failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Service name this breaker guards.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "team-service",
            &CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
    }

    #[test]
    fn opens_on_nth_consecutive_failure() {
        let cb = breaker(5, Duration::from_secs(30));
        for _ in 0..4 {
            cb.record_failure();
            assert!(!cb.is_open());
            assert!(cb.can_proceed());
        }
        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.can_proceed());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = breaker(5, Duration::from_secs(30));
        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(!cb.is_open());
    }

    #[test]
    fn probe_allowed_after_cooldown() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        assert!(!cb.can_proceed());
        std::thread::sleep(Duration::from_millis(15));
        // Cooldown elapsed: probe goes through while still marked open
        assert!(cb.can_proceed());
        assert!(cb.is_open());
    }

    #[test]
    fn failed_probe_keeps_circuit_open() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.can_proceed());
        cb.record_failure();
        // Last-failure timestamp refreshed, so the window restarts
        assert!(!cb.can_proceed());
    }

    #[test]
    fn successful_probe_closes_circuit() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.can_proceed());
        cb.record_success();
        assert!(!cb.is_open());
        assert!(cb.can_proceed());
    }
}
