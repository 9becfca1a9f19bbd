//! # Circuit Breaker Configuration
//!
//! Thresholds shared by every per-sampler breaker.

use crate::config::duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the per-sampler circuit breakers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before allowing a trial poll
    #[serde(with = "duration")]
    pub timeout: Duration,

    /// Growth factor applied to the timeout after each failed trial
    pub backoff_multiplier: f64,

    /// Ceiling for the grown timeout
    #[serde(with = "duration")]
    pub max_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            ));
        }

        if self.max_timeout < self.timeout {
            return Err(format!(
                "max_timeout ({:?}) must not be shorter than timeout ({:?})",
                self.max_timeout, self.timeout
            ));
        }

        Ok(())
    }

    /// Cooldown to apply after a failed trial that followed `current`
    pub fn next_timeout(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_multiplier)
            .unwrap_or(self.max_timeout)
            .min(self.max_timeout)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 20,
            timeout: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            max_timeout: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_threshold = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(zero_threshold.validate().is_err());

        let shrinking = CircuitBreakerConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = CircuitBreakerConfig {
            timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_next_timeout_grows_up_to_ceiling() {
        let config = CircuitBreakerConfig {
            timeout: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_timeout: Duration::from_secs(200),
            ..Default::default()
        };
        assert_eq!(config.next_timeout(Duration::from_secs(60)), Duration::from_secs(120));
        assert_eq!(config.next_timeout(Duration::from_secs(120)), Duration::from_secs(200));
    }
}
