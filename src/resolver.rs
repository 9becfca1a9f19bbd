//! # Interface Resolver
//!
//! Entry point used by flow-processing code. [`InterfaceResolver::lookup`]
//! answers from the cache without waiting; misses queue a background poll
//! whose result serves later lookups.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ifmeta_core::clock::SystemClock;
//! use ifmeta_core::config::ResolverConfig;
//! use ifmeta_core::poller::MockPoller;
//! use ifmeta_core::resolver::InterfaceResolver;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = InterfaceResolver::new(
//!     ResolverConfig::default(),
//!     Arc::new(MockPoller::new()),
//!     Arc::new(SystemClock),
//! )?;
//! resolver.start();
//!
//! match resolver.lookup("192.0.2.1".parse()?, 3) {
//!     Ok((sampler_name, interface)) => println!("{sampler_name}: {}", interface.name),
//!     Err(err) if err.is_cache_miss() => {} // resolved in the background
//!     Err(err) => return Err(err.into()),
//! }
//!
//! resolver.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheKey, CacheStore, Interface};
use crate::clock::Clock;
use crate::config::ResolverConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ResolverError, ResolverResult};
use crate::logging::log_persistence_operation;
use crate::metrics::{MetricsSnapshot, ResolverMetrics};
use crate::persistence;
use crate::poller::Poller;
use crate::refresher::Refresher;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Asynchronous interface metadata cache
pub struct InterfaceResolver {
    config: ResolverConfig,
    store: Arc<CacheStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    metrics: Arc<ResolverMetrics>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for InterfaceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceResolver")
            .field("entries", &self.store.len())
            .field("workers", &self.config.workers)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl InterfaceResolver {
    /// Build a resolver, failing on an invalid configuration.
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(
        config: ResolverConfig,
        poller: Arc<dyn Poller>,
        clock: Arc<dyn Clock>,
    ) -> ResolverResult<Self> {
        config.validate()?;

        let metrics = Arc::new(ResolverMetrics::new());
        let store = Arc::new(CacheStore::new(clock.clone(), metrics.clone()));
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            &config,
            store.clone(),
            poller,
            clock.clone(),
            metrics.clone(),
            cancel.clone(),
        );

        Ok(Self {
            config,
            store,
            dispatcher,
            clock,
            metrics,
            cancel,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Restore the persisted cache and spawn the workers and the refresher.
    ///
    /// Must be called from within a Tokio runtime. Later calls are ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(path) = self.config.persist_file() {
            match persistence::load(path, &self.store, self.clock.now(), self.config.cache_duration)
            {
                Ok(entries) => log_persistence_operation("load", path, Some(entries), None),
                Err(err) => log_persistence_operation("load", path, None, Some(&err.to_string())),
            }
        }

        let mut tasks = self.dispatcher.spawn_workers(self.config.workers);
        let refresher = Refresher::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            self.metrics.clone(),
            self.config.cache_duration,
            self.config.cache_refresh,
            self.config.cache_check_interval,
        );
        tasks.push(tokio::spawn(refresher.run(self.cancel.clone())));
        *self.tasks.lock() = tasks;

        info!(
            workers = self.config.workers,
            entries = self.store.len(),
            "Interface resolver started"
        );
    }

    /// Resolve `(sampler, if_index)` from the cache.
    ///
    /// Returns [`ResolverError::CacheMiss`] when the value is absent or expired;
    /// a poll is then queued unless the request queue is full.
    pub fn lookup(&self, sampler: IpAddr, if_index: u32) -> ResolverResult<(String, Interface)> {
        let key = CacheKey::new(sampler, if_index);
        if let Some(found) = self.store.get(&key, self.config.cache_duration) {
            return Ok(found);
        }
        self.dispatcher.submit(key);
        Err(ResolverError::CacheMiss)
    }

    /// Cancel background work, wait for it, then persist the cache.
    ///
    /// Later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(err) = result {
                error!(error = %err, "Background task ended abnormally");
            }
        }
        let discarded = self.dispatcher.drain();

        if let Some(path) = self.config.persist_file() {
            match persistence::save(path, &self.store, self.clock.now()) {
                Ok(entries) => log_persistence_operation("save", path, Some(entries), None),
                Err(err) => log_persistence_operation("save", path, None, Some(&err.to_string())),
            }
        }

        info!(discarded_batches = discarded, "Interface resolver stopped");
    }

    /// Current counters and gauges
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.store.len() as u64,
            self.store.sampler_count() as u64,
        )
    }

    /// Samplers whose circuit breaker is not closed
    pub fn open_breakers(&self) -> Vec<IpAddr> {
        self.dispatcher.breakers().open_components()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Underlying store, e.g. for pollers sharing this resolver's cache
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }
}
