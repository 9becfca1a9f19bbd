#![allow(dead_code)] // Each test binary uses a different subset

pub mod strategies;

use ifmeta_core::clock::MockClock;
use ifmeta_core::config::ResolverConfig;
use ifmeta_core::poller::Poller;
use ifmeta_core::resolver::InterfaceResolver;
use std::net::IpAddr;
use std::sync::Arc;

pub use ifmeta_core::test_helpers::{wait_until, FailingPoller, GatedPoller, SlowPoller};

/// Resolver driven by a mock clock, already started
pub struct TestResolver {
    pub resolver: InterfaceResolver,
    pub clock: Arc<MockClock>,
}

impl TestResolver {
    pub fn start(config: ResolverConfig, poller: Arc<dyn Poller>) -> Self {
        ifmeta_core::test_helpers::init_test_logging();
        let clock = Arc::new(MockClock::new());
        let resolver = InterfaceResolver::new(config, poller, clock.clone())
            .expect("test configuration should be valid");
        resolver.start();
        Self { resolver, clock }
    }

    /// Look the key up until it resolves
    pub async fn resolve(&self, sampler: IpAddr, if_index: u32) -> bool {
        wait_until(|| self.resolver.lookup(sampler, if_index).is_ok()).await
    }
}

pub fn ip(address: &str) -> IpAddr {
    address.parse().expect("valid address literal")
}
