//! Concurrent TTL store for resolved interfaces.

use super::types::{CacheEntry, CacheKey, Interface};
use crate::clock::{age, Clock};
use crate::metrics::ResolverMetrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Key/value store shared by lookup callers, dispatcher workers and the refresher.
///
/// Reads never wait on writers of other shards; all mutation goes through
/// [`put`](Self::put), [`sweep`](Self::sweep) and the in-flight helpers.
#[derive(Debug)]
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<ResolverMetrics>,
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<ResolverMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            metrics,
        }
    }

    /// Read a key, counting the outcome as a hit or a miss.
    ///
    /// An entry whose age already reached `max_age` but which the refresher has
    /// not swept yet is reported as a miss.
    pub fn get(&self, key: &CacheKey, max_age: Duration) -> Option<(String, Interface)> {
        let found = self.entries.get(key).and_then(|entry| {
            if age(self.clock.now(), entry.last_updated) >= max_age {
                None
            } else {
                Some((entry.sampler_name.clone(), entry.interface.clone()))
            }
        });

        match found {
            Some(answer) => {
                self.metrics.record_hit();
                Some(answer)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Insert or replace a key, stamping it with the current time
    pub fn put(&self, key: CacheKey, sampler_name: impl Into<String>, interface: Interface) {
        let entry = CacheEntry {
            sampler_name: sampler_name.into(),
            interface,
            last_updated: self.clock.now(),
            poll_in_flight: false,
        };
        trace!(key = %key, name = %entry.interface.name, "Caching interface");
        self.entries.insert(key, entry);
    }

    /// Remove every entry whose age reached `duration`
    pub fn sweep(&self, now: DateTime<Utc>, duration: Duration) -> Vec<CacheKey> {
        let mut evicted = Vec::new();
        self.entries.retain(|key, entry| {
            let keep = age(now, entry.last_updated) < duration;
            if !keep {
                evicted.push(*key);
            }
            keep
        });

        if !evicted.is_empty() {
            self.metrics.record_expired(evicted.len() as u64);
            debug!(count = evicted.len(), "Evicted expired interfaces");
        }
        evicted
    }

    /// Flag entries older than `refresh_after` for background refresh.
    ///
    /// Entries already flagged are skipped; the returned keys are exactly the
    /// ones flagged by this call.
    pub fn mark_refresh_candidates(
        &self,
        now: DateTime<Utc>,
        refresh_after: Duration,
    ) -> Vec<CacheKey> {
        let mut scheduled = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if !entry.poll_in_flight && age(now, entry.last_updated) >= refresh_after {
                entry.poll_in_flight = true;
                scheduled.push(*entry.key());
            }
        }
        scheduled
    }

    /// Clear the in-flight flag on keys whose poll finished without replacing them
    pub fn clear_in_flight<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        for key in keys {
            if let Some(mut entry) = self.entries.get_mut(key) {
                entry.poll_in_flight = false;
            }
        }
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.poll_in_flight)
            .unwrap_or(false)
    }

    /// Copy of every entry, for persistence
    pub fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Rehydrate entries, dropping the ones already expired at `now`.
    ///
    /// An existing entry is only replaced by a more recent one. Returns the
    /// number of entries restored.
    pub fn restore(
        &self,
        entries: impl IntoIterator<Item = (CacheKey, CacheEntry)>,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> usize {
        let mut restored = 0;
        for (key, mut entry) in entries {
            if age(now, entry.last_updated) >= duration {
                continue;
            }
            entry.poll_in_flight = false;
            let newer = self
                .entries
                .get(&key)
                .map(|current| current.last_updated < entry.last_updated)
                .unwrap_or(true);
            if newer {
                self.entries.insert(key, entry);
                restored += 1;
            }
        }
        restored
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct samplers with at least one entry
    pub fn sampler_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.key().sampler)
            .collect::<HashSet<IpAddr>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    const HOUR: Duration = Duration::from_secs(3600);

    fn interface(index: u32) -> Interface {
        Interface {
            name: format!("Gi0/0/{index}"),
            description: format!("Interface {index}"),
            speed: 1000,
        }
    }

    fn store() -> (CacheStore, Arc<MockClock>, Arc<ResolverMetrics>) {
        let clock = Arc::new(MockClock::new());
        let metrics = Arc::new(ResolverMetrics::new());
        let store = CacheStore::new(clock.clone(), metrics.clone());
        (store, clock, metrics)
    }

    fn key(sampler: &str, if_index: u32) -> CacheKey {
        CacheKey::new(sampler.parse().unwrap(), if_index)
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let (store, _clock, metrics) = store();
        assert!(store.get(&key("127.0.0.1", 765), HOUR).is_none());

        store.put(key("127.0.0.1", 765), "127_0_0_1", interface(765));
        let (name, found) = store.get(&key("127.0.0.1", 765), HOUR).unwrap();
        assert_eq!(name, "127_0_0_1");
        assert_eq!(found, interface(765));

        let snapshot = metrics.snapshot(0, 0);
        assert_eq!(snapshot.hit, 1);
        assert_eq!(snapshot.miss, 1);
    }

    #[test]
    fn test_expired_entry_is_not_served_before_sweep() {
        let (store, clock, _metrics) = store();
        store.put(key("127.0.0.1", 1), "r1", interface(1));
        clock.advance(HOUR);
        assert!(store.get(&key("127.0.0.1", 1), HOUR).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_overwrites_and_clears_in_flight() {
        let (store, clock, _metrics) = store();
        store.put(key("127.0.0.1", 1), "r1", interface(1));
        clock.advance(Duration::from_secs(600));
        let marked = store.mark_refresh_candidates(clock.now(), Duration::from_secs(300));
        assert_eq!(marked, vec![key("127.0.0.1", 1)]);
        assert!(store.is_in_flight(&key("127.0.0.1", 1)));

        let mut renamed = interface(1);
        renamed.description = "uplink".to_string();
        store.put(key("127.0.0.1", 1), "r1", renamed.clone());
        assert!(!store.is_in_flight(&key("127.0.0.1", 1)));
        assert_eq!(store.get(&key("127.0.0.1", 1), HOUR).unwrap().1, renamed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sweep_evicts_only_expired_entries() {
        let (store, clock, metrics) = store();
        store.put(key("127.0.0.1", 1), "r1", interface(1));
        clock.advance(Duration::from_secs(1800));
        store.put(key("127.0.0.2", 2), "r2", interface(2));
        clock.advance(Duration::from_secs(1800));

        let evicted = store.sweep(clock.now(), HOUR);
        assert_eq!(evicted, vec![key("127.0.0.1", 1)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.sampler_count(), 1);
        assert_eq!(metrics.snapshot(0, 0).expired, 1);
    }

    #[test]
    fn test_refresh_candidates_are_marked_once() {
        let (store, clock, _metrics) = store();
        store.put(key("127.0.0.1", 1), "r1", interface(1));
        store.put(key("127.0.0.1", 2), "r1", interface(2));
        clock.advance(Duration::from_secs(600));

        let first = store.mark_refresh_candidates(clock.now(), Duration::from_secs(600));
        assert_eq!(first.len(), 2);
        let second = store.mark_refresh_candidates(clock.now(), Duration::from_secs(600));
        assert!(second.is_empty());

        store.clear_in_flight(first.iter());
        let third = store.mark_refresh_candidates(clock.now(), Duration::from_secs(600));
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn test_restore_drops_stale_entries() {
        let (store, clock, _metrics) = store();
        store.put(key("127.0.0.1", 1), "r1", interface(1));
        clock.advance(Duration::from_secs(1800));
        store.put(key("127.0.0.2", 2), "r2", interface(2));
        let snapshot = store.snapshot();

        let (restored_store, _, _) = self::store();
        clock.advance(Duration::from_secs(1800));
        let restored = restored_store.restore(snapshot, clock.now(), HOUR);
        assert_eq!(restored, 1);
        assert_eq!(restored_store.len(), 1);
        assert!(restored_store
            .snapshot()
            .iter()
            .all(|(key, _)| key.sampler.to_string() == "127.0.0.2"));
    }

    #[test]
    fn test_sampler_count_groups_indexes() {
        let (store, _clock, _metrics) = store();
        store.put(key("127.0.0.1", 1), "r1", interface(1));
        store.put(key("127.0.0.1", 2), "r1", interface(2));
        store.put(key("::1", 2), "r6", interface(2));
        assert_eq!(store.len(), 3);
        assert_eq!(store.sampler_count(), 2);
    }
}
