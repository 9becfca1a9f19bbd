//! Configuration Error Types
//!
//! Errors raised while loading or validating resolver configuration. Every
//! variant is fatal: an invalid configuration prevents the resolver from
//! being constructed.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// File I/O errors during configuration loading
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    /// Syntax or type errors while building the configuration
    #[error("Parse error for file {file_path}: {reason}")]
    ParseError { file_path: String, reason: String },

    /// Configuration validation errors spanning several fields
    #[error("Configuration validation failed: {error}")]
    ValidationError { error: String },
}

impl ConfigurationError {
    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// Create a file read error
    pub fn file_read_error<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    /// Create a parse error
    pub fn parse_error<P: Into<String>, E: std::fmt::Display>(file_path: P, reason: E) -> Self {
        Self::ParseError {
            file_path: file_path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation_error<E: Into<String>>(error: E) -> Self {
        Self::ValidationError {
            error: error.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
