//! # Resilience Module
//!
//! Per-sampler circuit breakers isolating unreachable or misbehaving devices
//! so they cannot monopolize the poller workers.
//!
//! ## Usage
//!
//! ```rust
//! use ifmeta_core::clock::SystemClock;
//! use ifmeta_core::resilience::{CircuitBreakerConfig, CircuitBreakerManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default(), Arc::new(SystemClock));
//! let breaker = manager.get_circuit_breaker("192.0.2.1".parse().unwrap());
//! if breaker.try_acquire().is_ok() {
//!     // poll the device, then report the outcome
//!     breaker.record_success(Duration::from_millis(12));
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::CircuitBreakerMetrics;
