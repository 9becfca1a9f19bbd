//! # Coalescing Dispatcher
//!
//! Turns individual `(sampler, ifIndex)` resolution requests into poller
//! calls. Requests for one sampler are merged into a single call carrying the
//! union of their indexes; a fixed pool of workers places the calls, never
//! more than one at a time per sampler, each behind that sampler's circuit
//! breaker.

pub mod community;
pub mod queue;

use crate::cache::{CacheKey, CacheStore};
use crate::clock::Clock;
use crate::config::ResolverConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::metrics::ResolverMetrics;
use crate::poller::{PollError, PollRequest, PollSink, Poller};
use crate::resilience::CircuitBreakerManager;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use community::Communities;
pub use queue::{Admission, Batch, RequestQueue};

/// Request queue plus the worker pool draining it
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    queue: RequestQueue,
    store: Arc<CacheStore>,
    poller: Arc<dyn Poller>,
    breakers: CircuitBreakerManager,
    communities: Communities,
    metrics: Arc<ResolverMetrics>,
    cancel: CancellationToken,
    coalesce_window: Duration,
    poller_port: u16,
    poller_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &ResolverConfig,
        store: Arc<CacheStore>,
        poller: Arc<dyn Poller>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ResolverMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let inner = DispatcherInner {
            queue: RequestQueue::new(config.request_queue_capacity, config.coalescing_enabled()),
            store,
            poller,
            breakers: CircuitBreakerManager::new(config.breaker.clone(), clock),
            communities: Communities::from_config(config),
            metrics,
            cancel,
            coalesce_window: config.poller_coalesce,
            poller_port: config.poller_port,
            poller_timeout: config.poller_timeout,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Queue a resolution request; never waits.
    ///
    /// Returns `false` when the request was dropped because the queue is full.
    pub fn submit(&self, key: CacheKey) -> bool {
        match self.inner.queue.submit(key) {
            Admission::Queued | Admission::Merged => true,
            Admission::Full => {
                self.inner.metrics.record_dropped();
                trace!(key = %key, "Request queue full, dropping resolution request");
                false
            }
        }
    }

    /// Start `count` workers; they stop when the cancellation token fires
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        info!(workers = count, "Starting poller workers");
        (0..count)
            .map(|worker_id| {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.run_worker(worker_id).await })
            })
            .collect()
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.inner.breakers
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.pending()
    }

    /// Discard queued requests after the workers stopped
    pub fn drain(&self) -> usize {
        let batches = self.inner.queue.drain();
        for batch in &batches {
            let keys: Vec<CacheKey> = batch.keys().collect();
            self.inner.store.clear_in_flight(&keys);
        }
        batches.len()
    }
}

impl DispatcherInner {
    async fn run_worker(&self, worker_id: usize) {
        debug!(worker_id, "Poller worker started");
        loop {
            let Some(sampler) = self.queue.next_ready() else {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.queue.notified() => continue,
                }
            };

            if !self.linger(&sampler).await {
                self.queue.complete(&sampler);
                break;
            }

            let Some(batch) = self.queue.take_batch(&sampler) else {
                self.queue.complete(&sampler);
                continue;
            };
            self.metrics.record_coalesced(batch.requests.saturating_sub(1));

            let outcome = self.poll_batch(&batch).await;
            let keys: Vec<CacheKey> = batch.keys().collect();
            self.store.clear_in_flight(keys.iter());
            self.queue.complete(&sampler);

            match outcome {
                Ok(()) => {}
                Err(error @ ResolverError::BreakerOpen { .. }) => {
                    trace!(worker_id, %error, dropped = keys.len(), "Skipping poll");
                }
                Err(error) => {
                    debug!(worker_id, %error, "Poll failed");
                }
            }
        }
        debug!(worker_id, "Poller worker stopped");
    }

    /// Keep the sampler's batch open until the coalescing window closes.
    ///
    /// Returns `false` if cancelled while waiting.
    async fn linger(&self, sampler: &IpAddr) -> bool {
        if self.coalesce_window.is_zero() {
            return true;
        }
        let Some(deadline) = self.queue.batch_deadline(sampler, self.coalesce_window) else {
            return true;
        };
        if deadline <= tokio::time::Instant::now() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    async fn poll_batch(&self, batch: &Batch) -> ResolverResult<()> {
        let sampler = batch.sampler;
        let breaker = self.breakers.get_circuit_breaker(sampler);
        if breaker.try_acquire().is_err() {
            self.metrics.record_breaker_open(sampler);
            return Err(ResolverError::BreakerOpen { sampler });
        }

        let if_indexes: Vec<u32> = batch.if_indexes.iter().copied().collect();
        let request = PollRequest {
            sampler,
            port: self.poller_port,
            community: self.communities.resolve(&sampler),
            if_indexes: &if_indexes,
        };
        let sink = PollSink::new(Arc::clone(&self.store), sampler);

        trace!(sampler = %sampler, indexes = ?if_indexes, "Polling sampler");
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PollError::Cancelled),
            result = tokio::time::timeout(
                self.poller_timeout,
                self.poller.poll(&self.cancel, request, &sink),
            ) => result.unwrap_or(Err(PollError::Timeout(self.poller_timeout))),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                breaker.record_success(elapsed);
                self.metrics.record_poll_success();
                Ok(())
            }
            Err(PollError::Cancelled) => {
                breaker.release_trial();
                Ok(())
            }
            Err(error) => {
                breaker.record_failure(elapsed);
                self.metrics.record_poll_failure();
                if matches!(error, PollError::Auth(_)) {
                    warn!(sampler = %sampler, %error, "Sampler rejected poller credentials");
                }
                Err(ResolverError::PollFailure {
                    sampler,
                    reason: error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::poller::MockPoller;
    use crate::test_helpers::{wait_until, FailingPoller, GatedPoller, SlowPoller};
    use std::collections::HashMap;

    fn sampler(address: &str) -> IpAddr {
        address.parse().unwrap()
    }

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<CacheStore>,
        metrics: Arc<ResolverMetrics>,
        cancel: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    }

    impl Harness {
        fn start(config: ResolverConfig, poller: Arc<dyn Poller>) -> Self {
            let clock: Arc<dyn Clock> = Arc::new(MockClock::new());
            let metrics = Arc::new(ResolverMetrics::new());
            let store = Arc::new(CacheStore::new(clock.clone(), metrics.clone()));
            let cancel = CancellationToken::new();
            let dispatcher = Dispatcher::new(
                &config,
                store.clone(),
                poller,
                clock,
                metrics.clone(),
                cancel.clone(),
            );
            let handles = dispatcher.spawn_workers(config.workers);
            Self {
                dispatcher,
                store,
                metrics,
                cancel,
                handles,
            }
        }

        async fn stop(self) {
            self.cancel.cancel();
            futures::future::join_all(self.handles).await;
        }
    }

    #[tokio::test]
    async fn test_poll_result_lands_in_store() {
        let poller = Arc::new(MockPoller::new());
        let harness = Harness::start(ResolverConfig::default(), poller.clone());

        assert!(harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 765)));
        let store = harness.store.clone();
        assert!(wait_until(|| store.len() == 1).await);
        assert_eq!(poller.calls(), vec![(sampler("127.0.0.1"), vec![765])]);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_requests_queue_behind_in_flight_poll() {
        let poller = Arc::new(GatedPoller::new());
        let harness = Harness::start(ResolverConfig::default(), poller.clone());
        let target = sampler("127.0.0.1");

        harness.dispatcher.submit(CacheKey::new(target, 765));
        assert!(wait_until(|| poller.started() == 1).await);
        for if_index in 766..=769 {
            harness.dispatcher.submit(CacheKey::new(target, if_index));
        }

        poller.release(1);
        assert!(wait_until(|| poller.started() == 2).await);
        poller.release(1);
        assert!(wait_until(|| poller.accepted().len() == 2).await);

        assert_eq!(
            poller.accepted(),
            vec![(target, vec![765]), (target, vec![766, 767, 768, 769])]
        );
        assert_eq!(harness.metrics.snapshot(0, 0).coalesced_count, 3);
        assert_eq!(poller.max_concurrency_for(&target), 1);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_distinct_samplers_poll_in_parallel() {
        let poller = Arc::new(GatedPoller::new());
        let config = ResolverConfig {
            workers: 2,
            ..Default::default()
        };
        let harness = Harness::start(config, poller.clone());

        harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 1));
        harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.2"), 1));
        assert!(wait_until(|| poller.started() == 2).await);

        poller.release(2);
        assert!(wait_until(|| harness.store.len() == 2).await);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_breaker_short_circuits_failing_sampler() {
        let poller = Arc::new(FailingPoller::new());
        let mut config = ResolverConfig {
            poller_coalesce: Duration::ZERO,
            ..Default::default()
        };
        config.breaker.failure_threshold = 3;
        let harness = Harness::start(config, poller.clone());
        let dead = sampler("127.0.0.1");

        for _ in 0..5 {
            harness.dispatcher.submit(CacheKey::new(dead, 765));
        }
        let metrics = harness.metrics.clone();
        assert!(wait_until(|| metrics.snapshot(0, 0).breaker_open_for(&dead) == 2).await);
        assert_eq!(poller.call_count(), 3);
        assert_eq!(harness.metrics.snapshot(0, 0).poller_failure, 3);
        assert_eq!(harness.dispatcher.breakers().open_components(), vec![dead]);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_counts_dropped_requests() {
        let poller = Arc::new(GatedPoller::new());
        let config = ResolverConfig {
            request_queue_capacity: 1,
            ..Default::default()
        };
        let harness = Harness::start(config, poller.clone());

        assert!(harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 1)));
        assert!(wait_until(|| poller.started() == 1).await);
        assert!(harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 2)));
        assert!(!harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 3)));
        assert_eq!(harness.metrics.snapshot(0, 0).dropped_requests, 1);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_slow_poll_counts_as_failure() {
        let poller = Arc::new(SlowPoller::new(Duration::from_secs(5)));
        let config = ResolverConfig {
            poller_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let harness = Harness::start(config, poller.clone());
        let target = sampler("127.0.0.1");

        harness.dispatcher.submit(CacheKey::new(target, 1));
        let metrics = harness.metrics.clone();
        assert!(wait_until(|| metrics.snapshot(0, 0).poller_failure == 1).await);
        let breaker = harness.dispatcher.breakers().get_component_metrics(&target).unwrap();
        assert_eq!(breaker.failure_count, 1);
        assert!(harness.store.is_empty());
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_cancellation_stops_blocked_poll() {
        let poller = Arc::new(GatedPoller::new());
        let harness = Harness::start(ResolverConfig::default(), poller.clone());
        harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 1));
        assert!(wait_until(|| poller.started() == 1).await);

        let dispatcher = harness.dispatcher.clone();
        harness.stop().await;
        assert!(poller.accepted().is_empty());
        assert_eq!(dispatcher.drain(), 0);
    }

    #[tokio::test]
    async fn test_communities_are_resolved_per_sampler() {
        let poller = Arc::new(MockPoller::new());
        let config = ResolverConfig {
            default_community: "notpublic".to_string(),
            communities: HashMap::from([(sampler("127.0.0.1"), "public".to_string())]),
            ..Default::default()
        };
        let harness = Harness::start(config, poller.clone());

        harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.1"), 765));
        harness.dispatcher.submit(CacheKey::new(sampler("127.0.0.3"), 765));
        assert!(wait_until(|| poller.call_count() == 2).await);

        assert_eq!(harness.store.len(), 1);
        assert_eq!(harness.store.snapshot()[0].0.sampler, sampler("127.0.0.1"));
        harness.stop().await;
    }
}
