//! Pollers with scripted behavior.

use crate::poller::mock::answer_mock_request;
use crate::poller::{PollError, PollRequest, PollSink, Poller};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Concurrency {
    current: HashMap<IpAddr, usize>,
    max: HashMap<IpAddr, usize>,
}

/// Mock-answering poller whose calls block until the test releases them.
///
/// Each [`GatedPoller::release`] permit lets one blocked call finish.
#[derive(Debug)]
pub struct GatedPoller {
    gate: Semaphore,
    started: AtomicUsize,
    accepted: Mutex<Vec<(IpAddr, Vec<u32>)>>,
    concurrency: Mutex<Concurrency>,
}

impl GatedPoller {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
            concurrency: Mutex::new(Concurrency::default()),
        }
    }

    /// Let `count` blocked calls complete
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Calls that have begun, blocked or not
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Calls that passed the gate and answered, in completion order
    pub fn accepted(&self) -> Vec<(IpAddr, Vec<u32>)> {
        self.accepted.lock().clone()
    }

    /// Highest number of simultaneous calls seen for `sampler`
    pub fn max_concurrency_for(&self, sampler: &IpAddr) -> usize {
        self.concurrency
            .lock()
            .max
            .get(sampler)
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, sampler: IpAddr) {
        let mut concurrency = self.concurrency.lock();
        let current = {
            let current = concurrency.current.entry(sampler).or_insert(0);
            *current += 1;
            *current
        };
        let max = concurrency.max.entry(sampler).or_insert(0);
        *max = (*max).max(current);
    }

    fn leave(&self, sampler: IpAddr) {
        if let Some(current) = self.concurrency.lock().current.get_mut(&sampler) {
            *current = current.saturating_sub(1);
        }
    }
}

impl Default for GatedPoller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Poller for GatedPoller {
    async fn poll(
        &self,
        cancel: &CancellationToken,
        request: PollRequest<'_>,
        sink: &PollSink,
    ) -> Result<(), PollError> {
        self.enter(request.sampler);
        self.started.fetch_add(1, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(PollError::Cancelled),
            permit = self.gate.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    answer_mock_request(&request, sink);
                    self.accepted
                        .lock()
                        .push((request.sampler, request.if_indexes.to_vec()));
                    Ok(())
                }
                Err(_) => Err(PollError::Cancelled),
            },
        };

        self.leave(request.sampler);
        outcome
    }
}

/// Poller for which every sampler is unreachable
#[derive(Debug, Default)]
pub struct FailingPoller {
    calls: AtomicUsize,
}

impl FailingPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Poller for FailingPoller {
    async fn poll(
        &self,
        _cancel: &CancellationToken,
        request: PollRequest<'_>,
        _sink: &PollSink,
    ) -> Result<(), PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PollError::Unreachable(request.sampler.to_string()))
    }
}

/// Mock-answering poller that takes `delay` per call, ignoring cancellation
#[derive(Debug)]
pub struct SlowPoller {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowPoller {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Poller for SlowPoller {
    async fn poll(
        &self,
        _cancel: &CancellationToken,
        request: PollRequest<'_>,
        sink: &PollSink,
    ) -> Result<(), PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        answer_mock_request(&request, sink);
        Ok(())
    }
}
