//! # Resolver Configuration
//!
//! Values the interface resolver is constructed from. Durations are written
//! as seconds (fractions allowed) in files and environment overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ifmeta_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/ifmeta.toml")?;
//! let workers = manager.config().workers;
//! let ttl = manager.config().cache_duration;
//! # Ok(())
//! # }
//! ```

pub mod duration;
pub mod error;
pub mod loader;

use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration for the interface resolver
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Community used for samplers without an override
    pub default_community: String,

    /// Per-sampler community overrides
    pub communities: HashMap<IpAddr, String>,

    /// Entries older than this are evicted and never served
    #[serde(with = "duration")]
    pub cache_duration: Duration,

    /// Age after which an entry is refreshed in the background (0 disables refresh)
    #[serde(with = "duration")]
    pub cache_refresh: Duration,

    /// Period of the expiry/refresh scan
    #[serde(with = "duration")]
    pub cache_check_interval: Duration,

    /// Snapshot file loaded at start and written at stop (unset or empty disables persistence)
    pub cache_persist_file: Option<PathBuf>,

    /// Number of background poller workers
    pub workers: usize,

    /// Window during which requests for one sampler are merged (0 disables coalescing)
    #[serde(with = "duration")]
    pub poller_coalesce: Duration,

    /// Port the poller contacts samplers on
    pub poller_port: u16,

    /// Upper bound for a single poller call
    #[serde(with = "duration")]
    pub poller_timeout: Duration,

    /// Maximum number of pending interface indexes across all samplers
    pub request_queue_capacity: usize,

    /// Per-sampler circuit breaker settings
    pub breaker: CircuitBreakerConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_community: "public".to_string(),
            communities: HashMap::new(),
            cache_duration: Duration::from_secs(30 * 60),
            cache_refresh: Duration::from_secs(10 * 60),
            cache_check_interval: Duration::from_secs(2 * 60),
            cache_persist_file: None,
            workers: 1,
            poller_coalesce: Duration::from_millis(10),
            poller_port: 161,
            poller_timeout: Duration::from_secs(1),
            request_queue_capacity: 10_000,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Validate field combinations, failing on the first invalid one
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache_duration.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "cache_duration",
                format!("{:?}", self.cache_duration),
                "cache duration must be greater than 0",
            ));
        }

        if self.cache_check_interval.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "cache_check_interval",
                format!("{:?}", self.cache_check_interval),
                "cache check interval must be greater than 0",
            ));
        }

        if self.refresh_enabled() {
            if self.cache_refresh >= self.cache_duration / 2 {
                return Err(ConfigurationError::invalid_value(
                    "cache_refresh",
                    format!("{:?}", self.cache_refresh),
                    format!(
                        "cache refresh must be less than half the cache duration ({:?})",
                        self.cache_duration
                    ),
                ));
            }
            if self.cache_check_interval >= self.cache_refresh {
                return Err(ConfigurationError::invalid_value(
                    "cache_check_interval",
                    format!("{:?}", self.cache_check_interval),
                    format!(
                        "cache check interval must be less than cache refresh ({:?})",
                        self.cache_refresh
                    ),
                ));
            }
        }

        if self.workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "workers",
                "0",
                "at least one poller worker is required",
            ));
        }

        if self.request_queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "request_queue_capacity",
                "0",
                "request queue capacity must be greater than 0",
            ));
        }

        self.breaker
            .validate()
            .map_err(|error| ConfigurationError::validation_error(format!("breaker: {error}")))
    }

    pub fn refresh_enabled(&self) -> bool {
        !self.cache_refresh.is_zero()
    }

    pub fn coalescing_enabled(&self) -> bool {
        !self.poller_coalesce.is_zero()
    }

    /// Snapshot path, `None` when persistence is disabled
    pub fn persist_file(&self) -> Option<&Path> {
        self.cache_persist_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}
