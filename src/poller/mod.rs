//! # Poller Capability
//!
//! The network round-trip that fetches interface metadata from a sampler is
//! an injected [`Poller`]. Implementations push every interface they manage
//! to resolve into the [`PollSink`] as they learn it; indexes they cannot
//! resolve are simply left out. An `Err` means the call itself failed
//! (timeout, unreachable device, rejected credentials).

pub mod mock;

use crate::cache::{CacheKey, CacheStore, Interface};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use mock::MockPoller;

/// Call-level poll failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("poll timed out after {0:?}")]
    Timeout(Duration),
    #[error("sampler unreachable: {0}")]
    Unreachable(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("poll cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// One poller call: a sampler and the union of indexes requested for it
#[derive(Debug, Clone, Copy)]
pub struct PollRequest<'a> {
    pub sampler: IpAddr,
    pub port: u16,
    pub community: &'a str,
    pub if_indexes: &'a [u32],
}

/// Write handle given to a poller for delivering resolved interfaces
#[derive(Debug, Clone)]
pub struct PollSink {
    store: Arc<CacheStore>,
    sampler: IpAddr,
}

impl PollSink {
    pub fn new(store: Arc<CacheStore>, sampler: IpAddr) -> Self {
        Self { store, sampler }
    }

    pub fn sampler(&self) -> IpAddr {
        self.sampler
    }

    /// Store one resolved interface of the polled sampler
    pub fn deliver(&self, if_index: u32, sampler_name: &str, interface: Interface) {
        self.store
            .put(CacheKey::new(self.sampler, if_index), sampler_name, interface);
    }
}

/// Backend able to query one sampler for a set of interfaces.
///
/// Implementations must return promptly once `cancel` fires.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(
        &self,
        cancel: &CancellationToken,
        request: PollRequest<'_>,
        sink: &PollSink,
    ) -> Result<(), PollError>;
}
