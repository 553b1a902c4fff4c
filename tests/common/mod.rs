//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - A recording mock of the node API with scripted submit outcomes
//! - A tracing subscriber installer for readable test output
//! - A polling helper for asynchronous assertions

pub mod mock_node;

pub use mock_node::*;

use std::future::Future;
use std::time::Duration;

/// Install a human-readable tracing subscriber for this test binary.
///
/// Filtered by `RUST_LOG`; output is captured per test. Safe to call from
/// every test - only the first install wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it returns true or the timeout expires.
#[allow(dead_code)] // Not every test binary polls
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
