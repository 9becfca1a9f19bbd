//! # Resolver Metrics
//!
//! OpenTelemetry instruments for the cache, refresher and poller dispatch.
//! Each counter is mirrored in an atomic so the component can report a
//! [`MetricsSnapshot`] without going through an exporter.
//!
//! ## Instruments
//!
//! - `ifmeta.cache.{hit,miss,expired,refresh,refresh_runs}` (counters)
//! - `ifmeta.cache.{size,samplers}` (gauges)
//! - `ifmeta.poller.{coalesced_count,success,failure,dropped}` (counters)
//! - `ifmeta.poller.breaker_open_count` (counter, `sampler` attribute)

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static RESOLVER_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    RESOLVER_METER.get_or_init(|| opentelemetry::global::meter("ifmeta-resolver"))
}

fn counter(name: &'static str, description: &'static str) -> Counter<u64> {
    meter().u64_counter(name).with_description(description).build()
}

fn gauge(name: &'static str, description: &'static str) -> Gauge<u64> {
    meter().u64_gauge(name).with_description(description).build()
}

#[derive(Debug)]
struct Instruments {
    hit: Counter<u64>,
    miss: Counter<u64>,
    expired: Counter<u64>,
    refresh: Counter<u64>,
    refresh_runs: Counter<u64>,
    size: Gauge<u64>,
    samplers: Gauge<u64>,
    coalesced: Counter<u64>,
    breaker_open: Counter<u64>,
    poller_success: Counter<u64>,
    poller_failure: Counter<u64>,
    dropped: Counter<u64>,
}

impl Instruments {
    fn new() -> Self {
        Self {
            hit: counter("ifmeta.cache.hit", "Lookups answered from the cache"),
            miss: counter("ifmeta.cache.miss", "Lookups not present in the cache"),
            expired: counter("ifmeta.cache.expired", "Entries evicted after cache duration"),
            refresh: counter("ifmeta.cache.refresh", "Entries scheduled for background refresh"),
            refresh_runs: counter("ifmeta.cache.refresh_runs", "Refresher scans performed"),
            size: gauge("ifmeta.cache.size", "Live cache entries"),
            samplers: gauge("ifmeta.cache.samplers", "Distinct samplers present in the cache"),
            coalesced: counter(
                "ifmeta.poller.coalesced_count",
                "Requests merged into an existing poll",
            ),
            breaker_open: counter(
                "ifmeta.poller.breaker_open_count",
                "Polls skipped because the sampler breaker was open",
            ),
            poller_success: counter("ifmeta.poller.success", "Successful poller calls"),
            poller_failure: counter("ifmeta.poller.failure", "Failed poller calls"),
            dropped: counter(
                "ifmeta.poller.dropped",
                "Resolution requests dropped because the request queue was full",
            ),
        }
    }
}

/// Point-in-time copy of every counter and gauge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub expired: u64,
    pub size: u64,
    pub samplers: u64,
    pub refresh: u64,
    pub refresh_runs: u64,
    pub coalesced_count: u64,
    pub poller_success: u64,
    pub poller_failure: u64,
    pub dropped_requests: u64,
    pub breaker_open_count: BTreeMap<IpAddr, u64>,
}

impl MetricsSnapshot {
    /// Short-circuit count for one sampler, zero when never observed
    pub fn breaker_open_for(&self, sampler: &IpAddr) -> u64 {
        self.breaker_open_count.get(sampler).copied().unwrap_or(0)
    }
}

/// Counters shared by every resolver component
#[derive(Debug)]
pub struct ResolverMetrics {
    hit: AtomicU64,
    miss: AtomicU64,
    expired: AtomicU64,
    refresh: AtomicU64,
    refresh_runs: AtomicU64,
    coalesced: AtomicU64,
    poller_success: AtomicU64,
    poller_failure: AtomicU64,
    dropped: AtomicU64,
    breaker_open: DashMap<IpAddr, u64>,
    instruments: Instruments,
}

impl ResolverMetrics {
    pub fn new() -> Self {
        Self {
            hit: AtomicU64::new(0),
            miss: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            refresh: AtomicU64::new(0),
            refresh_runs: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            poller_success: AtomicU64::new(0),
            poller_failure: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            breaker_open: DashMap::new(),
            instruments: Instruments::new(),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
        self.instruments.hit.add(1, &[]);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
        self.instruments.miss.add(1, &[]);
    }

    pub fn record_expired(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.expired.fetch_add(count, Ordering::Relaxed);
        self.instruments.expired.add(count, &[]);
    }

    pub fn record_refresh(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.refresh.fetch_add(count, Ordering::Relaxed);
        self.instruments.refresh.add(count, &[]);
    }

    pub fn record_refresh_run(&self) {
        self.refresh_runs.fetch_add(1, Ordering::Relaxed);
        self.instruments.refresh_runs.add(1, &[]);
    }

    pub fn record_coalesced(&self, merged: u64) {
        if merged == 0 {
            return;
        }
        self.coalesced.fetch_add(merged, Ordering::Relaxed);
        self.instruments.coalesced.add(merged, &[]);
    }

    pub fn record_breaker_open(&self, sampler: IpAddr) {
        *self.breaker_open.entry(sampler).or_insert(0) += 1;
        self.instruments
            .breaker_open
            .add(1, &[KeyValue::new("sampler", sampler.to_string())]);
    }

    pub fn record_poll_success(&self) {
        self.poller_success.fetch_add(1, Ordering::Relaxed);
        self.instruments.poller_success.add(1, &[]);
    }

    pub fn record_poll_failure(&self) {
        self.poller_failure.fetch_add(1, Ordering::Relaxed);
        self.instruments.poller_failure.add(1, &[]);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.instruments.dropped.add(1, &[]);
    }

    /// Publish the store gauges
    pub fn record_gauges(&self, size: u64, samplers: u64) {
        self.instruments.size.record(size, &[]);
        self.instruments.samplers.record(samplers, &[]);
    }

    pub fn snapshot(&self, size: u64, samplers: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            size,
            samplers,
            refresh: self.refresh.load(Ordering::Relaxed),
            refresh_runs: self.refresh_runs.load(Ordering::Relaxed),
            coalesced_count: self.coalesced.load(Ordering::Relaxed),
            poller_success: self.poller_success.load(Ordering::Relaxed),
            poller_failure: self.poller_failure.load(Ordering::Relaxed),
            dropped_requests: self.dropped.load(Ordering::Relaxed),
            breaker_open_count: self
                .breaker_open
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

impl Default for ResolverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_counters() {
        let metrics = ResolverMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_expired(3);
        metrics.record_coalesced(0);
        metrics.record_breaker_open("127.0.0.1".parse().unwrap());
        metrics.record_breaker_open("127.0.0.1".parse().unwrap());

        let snapshot = metrics.snapshot(4, 1);
        assert_eq!(snapshot.hit, 2);
        assert_eq!(snapshot.miss, 1);
        assert_eq!(snapshot.expired, 3);
        assert_eq!(snapshot.coalesced_count, 0);
        assert_eq!(snapshot.size, 4);
        assert_eq!(snapshot.samplers, 1);
        assert_eq!(snapshot.breaker_open_for(&"127.0.0.1".parse().unwrap()), 2);
        assert_eq!(snapshot.breaker_open_for(&"127.0.0.2".parse().unwrap()), 0);
    }
}
