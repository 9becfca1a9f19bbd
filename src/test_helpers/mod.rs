// Test Helpers Module - Shared infrastructure for unit and integration tests
//
// Pollers with controllable behavior plus polling helpers for asserting on
// state that background workers update.

pub mod pollers;

pub use pollers::{FailingPoller, GatedPoller, SlowPoller};

use std::time::Duration;

/// Upper bound for [`wait_until`]
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Re-check `condition` until it holds or [`WAIT_TIMEOUT`] passes
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Install a test log subscriber; repeated calls are ignored
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
