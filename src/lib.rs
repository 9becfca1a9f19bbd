#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Interface Metadata Resolver
//!
//! Asynchronous cache mapping `(sampler address, ifIndex)` pairs from flow
//! records to interface metadata (name, description, speed) fetched from the
//! sampler over the network.
//!
//! ## Overview
//!
//! Flow decoding calls [`InterfaceResolver::lookup`] for every record, so the
//! lookup path never waits: it reads the cache and, on a miss, queues a
//! resolution request for a small pool of background workers. Workers merge
//! requests for the same sampler into one poll, keep at most one poll in
//! flight per sampler and stop calling samplers that keep failing.
//!
//! ## Key Features
//!
//! - **Stale-while-revalidate**: entries are refreshed in the background
//!   before they expire, so hot keys keep hitting
//! - **Request coalescing**: concurrent misses for one sampler become a
//!   single poll carrying the union of their indexes
//! - **Per-sampler circuit breakers**: dead devices are skipped during a
//!   cooldown instead of tying up workers
//! - **Persistence**: the cache survives restarts through a JSON snapshot
//!
//! ## Module Organization
//!
//! - [`cache`] - Concurrent TTL store
//! - [`dispatch`] - Request queue, coalescing and poller workers
//! - [`resilience`] - Circuit breakers guarding each sampler
//! - [`refresher`] - Periodic expiry and refresh scan
//! - [`persistence`] - Snapshot save and restore
//! - [`poller`] - Backend capability trait and the mock backend
//! - [`config`] - Configuration loading and validation
//! - [`metrics`] - OpenTelemetry counters with in-process snapshots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ifmeta_core::{InterfaceResolver, ResolverConfig, SystemClock};
//! use ifmeta_core::poller::MockPoller;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = InterfaceResolver::new(
//!     ResolverConfig::default(),
//!     Arc::new(MockPoller::new()),
//!     Arc::new(SystemClock),
//! )?;
//! resolver.start();
//! let _ = resolver.lookup("127.0.0.1".parse()?, 765);
//! resolver.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod poller;
pub mod refresher;
pub mod resilience;
pub mod resolver;
pub mod test_helpers;

pub use cache::{CacheEntry, CacheKey, CacheStore, Interface};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{ConfigManager, ConfigurationError, ResolverConfig};
pub use error::{ResolverError, ResolverResult};
pub use metrics::MetricsSnapshot;
pub use poller::{PollError, PollRequest, PollSink, Poller};
pub use resolver::InterfaceResolver;
