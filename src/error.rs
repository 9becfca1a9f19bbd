//! Error types for the interface resolver.
//!
//! Only [`ResolverError::CacheMiss`] reaches lookup callers and only
//! configuration faults reach the constructor. Poll failures, breaker
//! short-circuits and persistence problems are absorbed by the component and
//! surface through logs and metrics.

use crate::config::ConfigurationError;
use crate::persistence::PersistenceError;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    /// The key is not cached yet; a resolution request has been queued
    #[error("cache miss")]
    CacheMiss,
    #[error("poll of {sampler} failed: {reason}")]
    PollFailure { sampler: IpAddr, reason: String },
    #[error("circuit breaker open for {sampler}")]
    BreakerOpen { sampler: IpAddr },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, ResolverError::CacheMiss)
    }
}

pub type ResolverResult<T> = std::result::Result<T, ResolverError>;
