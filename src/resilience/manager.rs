//! # Circuit Breaker Manager
//!
//! Owns one [`CircuitBreaker`] per sampler. Breakers are created lazily on the
//! first poll for a sampler and never removed; the set is bounded by the
//! number of devices exporting flows.

use crate::clock::Clock;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Manager for the per-sampler circuit breakers
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: RwLock<HashMap<IpAddr, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuit_breakers: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Get or create the circuit breaker for a sampler
    pub fn get_circuit_breaker(&self, sampler: IpAddr) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.read().get(&sampler) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.circuit_breakers.write();

        // Double-check pattern (another worker might have created it)
        if let Some(breaker) = breakers.get(&sampler) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(CircuitBreaker::new(
            sampler.to_string(),
            self.config.clone(),
            Arc::clone(&self.clock),
        ));
        breakers.insert(sampler, Arc::clone(&breaker));

        debug!(
            sampler = %sampler,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Samplers observed so far
    pub fn list_components(&self) -> Vec<IpAddr> {
        self.circuit_breakers.read().keys().copied().collect()
    }

    /// Metrics for a specific sampler, `None` if it was never polled
    pub fn get_component_metrics(&self, sampler: &IpAddr) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .read()
            .get(sampler)
            .map(|breaker| breaker.metrics())
    }

    /// Samplers whose breaker is currently not closed
    pub fn open_components(&self) -> Vec<IpAddr> {
        self.circuit_breakers
            .read()
            .iter()
            .filter(|(_, breaker)| breaker.state() != CircuitState::Closed)
            .map(|(sampler, _)| *sampler)
            .collect()
    }
}
