//! # Circuit Breaker Implementation
//!
//! Per-sampler gate in front of the poller, following the classic pattern
//! with three states: Closed (normal operation), Open (failing fast), and
//! Half-Open (one trial poll after the cooldown).
//!
//! Time is read from the injected [`Clock`], so cooldowns can be driven by a
//! mock clock in tests.

use crate::clock::{to_chrono, Clock};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all polls are allowed through
    Closed = 0,
    /// Failure mode - polls are skipped without touching the network
    Open = 1,
    /// Testing recovery - a single trial poll is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },
}

/// Lock-free counters updated on every recorded outcome
#[derive(Debug, Default)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    rejected_calls: AtomicU64,
}

#[derive(Debug)]
struct Cooldown {
    open_until: Option<DateTime<Utc>>,
    current: Duration,
}

/// Circuit breaker guarding the polls of one sampler
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging, the sampler address
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    /// Set while the half-open trial poll is outstanding
    trial_in_flight: AtomicBool,

    config: CircuitBreakerConfig,

    metrics: AtomicCircuitBreakerMetrics,

    cooldown: Mutex<Cooldown>,

    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            "Circuit breaker initialized"
        );

        let cooldown = Cooldown {
            open_until: None,
            current: config.timeout,
        };

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            trial_in_flight: AtomicBool::new(false),
            config,
            metrics: AtomicCircuitBreakerMetrics::default(),
            cooldown: Mutex::new(cooldown),
            clock,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask for permission to place one call.
    ///
    /// An open breaker whose cooldown elapsed moves to half-open and grants the
    /// single trial call; every other open or half-open request is rejected.
    pub fn try_acquire(&self) -> Result<(), CircuitBreakerError> {
        let allowed = match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooldown_elapsed = self
                    .cooldown
                    .lock()
                    .open_until
                    .map(|until| self.clock.now() >= until)
                    .unwrap_or(true);
                if cooldown_elapsed {
                    self.transition_to_half_open();
                    self.claim_trial()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.claim_trial(),
        };

        if allowed {
            Ok(())
        } else {
            self.metrics.rejected_calls.fetch_add(1, Ordering::Relaxed);
            Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            })
        }
    }

    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a successful operation
    pub fn record_success(&self, duration: Duration) {
        self.metrics.total_calls.fetch_add(1, Ordering::Relaxed);
        self.metrics.success_count.fetch_add(1, Ordering::Relaxed);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Poll succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => self.transition_to_closed(),
            CircuitState::Closed => {
                self.metrics.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self, duration: Duration) {
        self.metrics.total_calls.fetch_add(1, Ordering::Relaxed);
        self.metrics.failure_count.fetch_add(1, Ordering::Relaxed);
        let consecutive = self
            .metrics
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            consecutive_failures = consecutive,
            "Poll failed"
        );

        match self.state() {
            CircuitState::Closed => {
                if consecutive >= u64::from(self.config.failure_threshold) {
                    self.transition_to_open(false);
                }
            }
            CircuitState::HalfOpen => {
                // Failed trial reopens the circuit with a grown cooldown
                self.transition_to_open(true);
            }
            CircuitState::Open => {}
        }
    }

    /// Return an unused half-open trial, e.g. when the poll was cancelled
    pub fn release_trial(&self) {
        self.trial_in_flight.store(false, Ordering::Release);
    }

    fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.metrics.consecutive_failures.store(0, Ordering::Relaxed);
        self.trial_in_flight.store(false, Ordering::Release);

        let mut cooldown = self.cooldown.lock();
        cooldown.open_until = None;
        cooldown.current = self.config.timeout;

        info!(component = %self.name, "Circuit breaker closed (recovered)");
    }

    fn transition_to_open(&self, after_trial: bool) {
        let now = self.clock.now();
        let open_until = {
            let mut cooldown = self.cooldown.lock();
            if after_trial {
                cooldown.current = self.config.next_timeout(cooldown.current);
            }
            let until = now + to_chrono(cooldown.current);
            cooldown.open_until = Some(until);
            until
        };

        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        warn!(
            component = %self.name,
            consecutive_failures = self.metrics.consecutive_failures.load(Ordering::Relaxed),
            failure_threshold = self.config.failure_threshold,
            open_until = %open_until,
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        let previous = self
            .state
            .swap(CircuitState::HalfOpen as u8, Ordering::AcqRel);
        if previous != CircuitState::HalfOpen as u8 {
            info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
        }
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.metrics.total_calls.load(Ordering::Relaxed),
            success_count: self.metrics.success_count.load(Ordering::Relaxed),
            failure_count: self.metrics.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.metrics.consecutive_failures.load(Ordering::Relaxed),
            rejected_calls: self.metrics.rejected_calls.load(Ordering::Relaxed),
            current_state: self.state(),
            open_until: self.cooldown.lock().open_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        (
            CircuitBreaker::new("127.0.0.1".to_string(), config, clock.clone()),
            clock,
        )
    }

    fn config(threshold: u32, timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout,
            ..Default::default()
        }
    }

    #[test]
    fn test_circuit_breaker_normal_operation() {
        let (circuit, _clock) = breaker(config(3, Duration::from_secs(60)));
        assert_eq!(circuit.state(), CircuitState::Closed);

        assert!(circuit.try_acquire().is_ok());
        circuit.record_success(Duration::from_millis(5));

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.open_until, None);
    }

    #[test]
    fn test_circuit_breaker_opens_on_failures() {
        let (circuit, _clock) = breaker(config(2, Duration::from_secs(60)));

        circuit.try_acquire().unwrap();
        circuit.record_failure(Duration::ZERO);
        assert_eq!(circuit.state(), CircuitState::Closed);

        circuit.try_acquire().unwrap();
        circuit.record_failure(Duration::ZERO);
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit.try_acquire();
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(circuit.metrics().rejected_calls, 1);
        assert!((circuit.metrics().failure_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (circuit, _clock) = breaker(config(2, Duration::from_secs(60)));
        circuit.record_failure(Duration::ZERO);
        circuit.record_success(Duration::ZERO);
        circuit.record_failure(Duration::ZERO);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().consecutive_failures, 1);
    }

    #[test]
    fn test_circuit_breaker_recovery() {
        let (circuit, clock) = breaker(config(1, Duration::from_secs(60)));

        circuit.record_failure(Duration::ZERO);
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.try_acquire().is_err());

        clock.advance(Duration::from_secs(60));

        // First call after the cooldown is the trial, a second one waits for it
        assert!(circuit.try_acquire().is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(circuit.try_acquire().is_err());

        circuit.record_success(Duration::ZERO);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().consecutive_failures, 0);
        assert!(circuit.try_acquire().is_ok());
    }

    #[test]
    fn test_failed_trial_reopens_with_backoff() {
        let (circuit, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_timeout: Duration::from_secs(600),
        });

        circuit.record_failure(Duration::ZERO);
        clock.advance(Duration::from_secs(60));
        circuit.try_acquire().unwrap();
        circuit.record_failure(Duration::ZERO);
        assert_eq!(circuit.state(), CircuitState::Open);

        // Cooldown doubled: still open after the initial timeout
        clock.advance(Duration::from_secs(60));
        assert!(circuit.try_acquire().is_err());
        clock.advance(Duration::from_secs(60));
        assert!(circuit.try_acquire().is_ok());
    }

    #[test]
    fn test_released_trial_can_be_claimed_again() {
        let (circuit, clock) = breaker(config(1, Duration::from_secs(1)));
        circuit.record_failure(Duration::ZERO);
        clock.advance(Duration::from_secs(1));

        circuit.try_acquire().unwrap();
        circuit.release_trial();
        assert!(circuit.try_acquire().is_ok());
    }
}
