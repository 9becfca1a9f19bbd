//! # Background Refresher
//!
//! Periodic scan of the cache store. Each tick evicts entries past the cache
//! duration and, when refresh is enabled, schedules a background poll for
//! entries past the refresh age so they are renewed before they expire.

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::dispatch::Dispatcher;
use crate::metrics::ResolverMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub expired: usize,
    pub scheduled: usize,
    pub dropped: usize,
}

pub struct Refresher {
    store: Arc<CacheStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    metrics: Arc<ResolverMetrics>,
    cache_duration: Duration,
    cache_refresh: Duration,
    check_interval: Duration,
}

impl Refresher {
    pub fn new(
        store: Arc<CacheStore>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        metrics: Arc<ResolverMetrics>,
        cache_duration: Duration,
        cache_refresh: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            metrics,
            cache_duration,
            cache_refresh,
            check_interval,
        }
    }

    /// Run a single scan now
    pub fn run_once(&self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport {
            expired: self.store.sweep(now, self.cache_duration).len(),
            ..Default::default()
        };

        if !self.cache_refresh.is_zero() {
            let candidates = self.store.mark_refresh_candidates(now, self.cache_refresh);
            for key in &candidates {
                if self.dispatcher.submit(*key) {
                    report.scheduled += 1;
                } else {
                    report.dropped += 1;
                    self.store.clear_in_flight(std::iter::once(key));
                }
            }
            self.metrics.record_refresh(report.scheduled as u64);
        }

        self.metrics.record_refresh_run();
        self.metrics.record_gauges(
            self.store.len() as u64,
            self.store.sampler_count() as u64,
        );

        if report != TickReport::default() {
            debug!(
                expired = report.expired,
                scheduled = report.scheduled,
                dropped = report.dropped,
                "Cache scan finished"
            );
        }
        report
    }

    /// Scan every check interval until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_ms = self.check_interval.as_millis() as u64,
            refresh = !self.cache_refresh.is_zero(),
            "Cache refresher started"
        );
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once();
                }
            }
        }
        info!("Cache refresher stopped");
    }
}
