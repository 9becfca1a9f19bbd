//! Deterministic poller used by tests and local runs.

use super::{PollError, PollRequest, PollSink, Poller};
use crate::cache::Interface;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Community the mock device accepts
pub const MOCK_COMMUNITY: &str = "public";

/// Poller answering for any sampler polled with the `public` community.
///
/// Interface `i` resolves to `Gi0/0/i`, described as `Interface i`, at
/// 1000 Mbps. Other communities resolve nothing, without an error, as an
/// SNMP agent silently dropping unauthenticated requests would.
#[derive(Debug, Default)]
pub struct MockPoller {
    calls: Mutex<Vec<(IpAddr, Vec<u32>)>>,
}

impl MockPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(sampler, indexes)` polled so far, in call order
    pub fn calls(&self) -> Vec<(IpAddr, Vec<u32>)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Sampler name the mock reports: the address with separators replaced by `_`
pub fn mock_sampler_name(sampler: &IpAddr) -> String {
    sampler.to_string().replace(['.', ':'], "_")
}

pub fn mock_interface(if_index: u32) -> Interface {
    Interface {
        name: format!("Gi0/0/{if_index}"),
        description: format!("Interface {if_index}"),
        speed: 1000,
    }
}

/// Deliver the mock answer for `request` when its community is accepted
pub fn answer_mock_request(request: &PollRequest<'_>, sink: &PollSink) {
    if request.community != MOCK_COMMUNITY {
        return;
    }
    let name = mock_sampler_name(&request.sampler);
    for &if_index in request.if_indexes {
        sink.deliver(if_index, &name, mock_interface(if_index));
    }
}

#[async_trait]
impl Poller for MockPoller {
    async fn poll(
        &self,
        cancel: &CancellationToken,
        request: PollRequest<'_>,
        sink: &PollSink,
    ) -> Result<(), PollError> {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        self.calls
            .lock()
            .push((request.sampler, request.if_indexes.to_vec()));
        answer_mock_request(&request, sink);
        Ok(())
    }
}
