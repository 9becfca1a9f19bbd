//! Configuration Loader
//!
//! Layers a configuration file (TOML, YAML or JSON, picked from the extension)
//! with `IFMETA__`-prefixed environment overrides, then validates the result.
//!
//! Nested fields use a double underscore: `IFMETA__BREAKER__FAILURE_THRESHOLD=5`.

use super::error::{ConfigResult, ConfigurationError};
use super::ResolverConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "IFMETA";
const ENV_SEPARATOR: &str = "__";

/// Validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ResolverConfig,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from a file, applying environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        Self::check_file(path)?;

        debug!(path = %path.display(), "Loading resolver configuration");

        let config: ResolverConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()
            .and_then(|built| built.try_deserialize::<ResolverConfig>())
            .map_err(|e| ConfigurationError::parse_error(path.display().to_string(), e))?;

        Self::finish(config, Some(path.to_path_buf()))
    }

    /// Build configuration from defaults and environment overrides only
    pub fn load_from_env() -> ConfigResult<Arc<ConfigManager>> {
        let config: ResolverConfig = Config::builder()
            .add_source(Self::environment())
            .build()
            .and_then(|built| built.try_deserialize::<ResolverConfig>())
            .map_err(|e| ConfigurationError::parse_error("<environment>", e))?;

        Self::finish(config, None)
    }

    /// Wrap an already built configuration, validating it
    pub fn from_config(config: ResolverConfig) -> ConfigResult<Arc<ConfigManager>> {
        Self::finish(config, None)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Configuration as JSON with community strings masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    fn finish(config: ResolverConfig, source: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            workers = config.workers,
            cache_duration_secs = config.cache_duration.as_secs(),
            cache_refresh_secs = config.cache_refresh.as_secs(),
            persistence = config.persist_file().is_some(),
            "Resolver configuration loaded"
        );

        Ok(Arc::new(ConfigManager { config, source }))
    }

    fn check_file(path: &Path) -> ConfigResult<()> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!("Configuration file larger than {MAX_CONFIG_FILE_SIZE} bytes"),
            ));
        }

        Ok(())
    }

    /// Communities are credentials; never log them
    fn sanitize_config_for_logging(config: &ResolverConfig) -> serde_json::Value {
        let mut value = serde_json::json!(config);
        if let Some(object) = value.as_object_mut() {
            object.insert("default_community".to_string(), "***".into());
            if let Some(communities) = object
                .get_mut("communities")
                .and_then(serde_json::Value::as_object_mut)
            {
                for community in communities.values_mut() {
                    *community = "***".into();
                }
            }
        }
        value
    }
}
