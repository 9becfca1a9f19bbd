//! # Circuit Breaker Metrics
//!
//! Snapshot of a single breaker, used for diagnostics and tests.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls let through
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Calls short-circuited while open
    pub rejected_calls: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// End of the current cooldown, `None` while closed
    pub open_until: Option<DateTime<Utc>>,
}

impl CircuitBreakerMetrics {
    /// Fraction of let-through calls that failed
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_calls as f64
    }
}
