//! Per-sampler request queue with coalescing.
//!
//! Admission, merging and the "poll in flight" flag share one lock, so a
//! sampler is handed to at most one worker at a time and requests arriving
//! meanwhile always land in the batch that runs next.

use crate::cache::CacheKey;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Requests for one sampler that will be served by a single poll
#[derive(Debug, Clone)]
pub struct Batch {
    pub sampler: IpAddr,
    pub if_indexes: BTreeSet<u32>,
    /// Number of submissions merged into this batch
    pub requests: u64,
    opened_at: Instant,
}

impl Batch {
    fn open(sampler: IpAddr, if_index: u32) -> Self {
        Self {
            sampler,
            if_indexes: BTreeSet::from([if_index]),
            requests: 1,
            opened_at: Instant::now(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = CacheKey> + '_ {
        self.if_indexes
            .iter()
            .map(move |&if_index| CacheKey::new(self.sampler, if_index))
    }
}

/// Outcome of [`RequestQueue::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new index was queued
    Queued,
    /// The index was already waiting in the open batch
    Merged,
    /// The queue is at capacity; the request was dropped
    Full,
}

#[derive(Debug, Default)]
struct SamplerQueue {
    batches: VecDeque<Batch>,
    /// A worker owns this sampler
    in_flight: bool,
    /// The sampler is waiting in the ready list
    scheduled: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    samplers: HashMap<IpAddr, SamplerQueue>,
    ready: VecDeque<IpAddr>,
    pending: usize,
}

#[derive(Debug)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    coalesce: bool,
}

impl RequestQueue {
    pub fn new(capacity: usize, coalesce: bool) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
            coalesce,
        }
    }

    /// Queue a resolution request without waiting.
    ///
    /// With coalescing enabled the request joins the sampler's open batch,
    /// otherwise every request becomes its own batch.
    pub fn submit(&self, key: CacheKey) -> Admission {
        let mut state = self.state.lock();
        let QueueState {
            samplers,
            ready,
            pending,
        } = &mut *state;

        let queue = samplers.entry(key.sampler).or_default();
        let open_batch = if self.coalesce {
            queue.batches.back_mut()
        } else {
            None
        };

        let admission = match open_batch {
            Some(batch) if batch.if_indexes.contains(&key.if_index) => {
                batch.requests += 1;
                Admission::Merged
            }
            _ if *pending >= self.capacity => Admission::Full,
            Some(batch) => {
                batch.if_indexes.insert(key.if_index);
                batch.requests += 1;
                *pending += 1;
                Admission::Queued
            }
            None => {
                queue.batches.push_back(Batch::open(key.sampler, key.if_index));
                *pending += 1;
                Admission::Queued
            }
        };

        if admission == Admission::Full {
            if queue.batches.is_empty() && !queue.in_flight {
                samplers.remove(&key.sampler);
            }
            return admission;
        }

        if !queue.in_flight && !queue.scheduled {
            queue.scheduled = true;
            ready.push_back(key.sampler);
            drop(state);
            self.notify.notify_one();
        }
        admission
    }

    /// Claim the next sampler with queued work, marking it in flight
    pub fn next_ready(&self) -> Option<IpAddr> {
        let mut state = self.state.lock();
        while let Some(sampler) = state.ready.pop_front() {
            if let Some(queue) = state.samplers.get_mut(&sampler) {
                queue.scheduled = false;
                queue.in_flight = true;
                return Some(sampler);
            }
        }
        None
    }

    /// When the sampler's next batch stops accepting merges
    pub fn batch_deadline(&self, sampler: &IpAddr, window: Duration) -> Option<Instant> {
        let state = self.state.lock();
        state
            .samplers
            .get(sampler)
            .and_then(|queue| queue.batches.front())
            .map(|batch| batch.opened_at + window)
    }

    /// Seal and remove the sampler's next batch
    pub fn take_batch(&self, sampler: &IpAddr) -> Option<Batch> {
        let mut state = self.state.lock();
        let batch = state
            .samplers
            .get_mut(sampler)
            .and_then(|queue| queue.batches.pop_front())?;
        state.pending = state.pending.saturating_sub(batch.if_indexes.len());
        Some(batch)
    }

    /// Release a sampler after its poll, rescheduling it if more work queued up
    pub fn complete(&self, sampler: &IpAddr) {
        let mut state = self.state.lock();
        let QueueState {
            samplers, ready, ..
        } = &mut *state;

        let Some(queue) = samplers.get_mut(sampler) else {
            return;
        };
        queue.in_flight = false;
        if queue.batches.is_empty() {
            samplers.remove(sampler);
            return;
        }
        if !queue.scheduled {
            queue.scheduled = true;
            ready.push_back(*sampler);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Wait until work may be available
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Drop every queued batch, returning them
    pub fn drain(&self) -> Vec<Batch> {
        let mut state = self.state.lock();
        state.ready.clear();
        state.pending = 0;
        state
            .samplers
            .drain()
            .flat_map(|(_, queue)| queue.batches)
            .collect()
    }

    /// Number of queued interface indexes across all samplers
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    pub fn is_in_flight(&self, sampler: &IpAddr) -> bool {
        self.state
            .lock()
            .samplers
            .get(sampler)
            .map(|queue| queue.in_flight)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sampler: &str, if_index: u32) -> CacheKey {
        CacheKey::new(sampler.parse().unwrap(), if_index)
    }

    #[test]
    fn test_requests_merge_while_sampler_in_flight() {
        let queue = RequestQueue::new(100, true);
        let sampler: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(queue.submit(key("127.0.0.1", 765)), Admission::Queued);
        assert_eq!(queue.next_ready(), Some(sampler));
        let first = queue.take_batch(&sampler).unwrap();
        assert_eq!(first.if_indexes, BTreeSet::from([765]));

        for if_index in 766..=769 {
            assert_eq!(queue.submit(key("127.0.0.1", if_index)), Admission::Queued);
        }
        // Busy sampler is not handed to a second worker
        assert_eq!(queue.next_ready(), None);

        queue.complete(&sampler);
        assert_eq!(queue.next_ready(), Some(sampler));
        let second = queue.take_batch(&sampler).unwrap();
        assert_eq!(second.if_indexes, BTreeSet::from([766, 767, 768, 769]));
        assert_eq!(second.requests, 4);
        queue.complete(&sampler);
        assert_eq!(queue.pending(), 0);
        assert!(!queue.is_in_flight(&sampler));
    }

    #[test]
    fn test_duplicate_index_is_merged() {
        let queue = RequestQueue::new(1, true);
        assert_eq!(queue.submit(key("127.0.0.1", 1)), Admission::Queued);
        assert_eq!(queue.submit(key("127.0.0.1", 1)), Admission::Merged);
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn test_without_coalescing_each_request_is_a_batch() {
        let queue = RequestQueue::new(100, false);
        let sampler: IpAddr = "127.0.0.1".parse().unwrap();
        queue.submit(key("127.0.0.1", 1));
        queue.submit(key("127.0.0.1", 1));
        queue.submit(key("127.0.0.1", 2));
        assert_eq!(queue.pending(), 3);

        assert_eq!(queue.next_ready(), Some(sampler));
        let mut seen = Vec::new();
        while let Some(batch) = queue.take_batch(&sampler) {
            assert_eq!(batch.requests, 1);
            seen.extend(batch.if_indexes);
        }
        assert_eq!(seen, vec![1, 1, 2]);
    }

    #[test]
    fn test_full_queue_drops_new_indexes() {
        let queue = RequestQueue::new(2, true);
        assert_eq!(queue.submit(key("127.0.0.1", 1)), Admission::Queued);
        assert_eq!(queue.submit(key("127.0.0.2", 1)), Admission::Queued);
        assert_eq!(queue.submit(key("127.0.0.3", 1)), Admission::Full);
        assert_eq!(queue.submit(key("127.0.0.1", 2)), Admission::Full);
        // Already queued index still merges
        assert_eq!(queue.submit(key("127.0.0.1", 1)), Admission::Merged);
    }

    #[test]
    fn test_distinct_samplers_are_ready_independently() {
        let queue = RequestQueue::new(100, true);
        queue.submit(key("127.0.0.1", 1));
        queue.submit(key("127.0.0.2", 1));
        let first = queue.next_ready().unwrap();
        let second = queue.next_ready().unwrap();
        assert_ne!(first, second);
        assert_eq!(queue.next_ready(), None);
    }

    #[test]
    fn test_drain_clears_everything() {
        let queue = RequestQueue::new(100, true);
        queue.submit(key("127.0.0.1", 1));
        queue.submit(key("127.0.0.2", 1));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.next_ready(), None);
    }
}
