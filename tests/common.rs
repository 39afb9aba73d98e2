//! Common test utilities.
//!
//! Shared helpers for the integration tests. Import with `mod common;`.

#![allow(dead_code)]

use broker::core::config::{BrokerOptions, Config};
use broker::core::time::{SimClock, Timestamp};
use broker::endpoint::Endpoint;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Configuration suitable for fast, network-free tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.options = BrokerOptions {
        disable_ssl: true,
        ignore_broker_conf: true,
        ..Default::default()
    };
    config.channel.tick_interval_ms = 10;
    config.store.request_timeout_ms = 2_000;
    config.store.stale_threshold_ms = 1_000;
    config
}

/// Endpoint on the real clock.
pub fn make_endpoint() -> Endpoint {
    Endpoint::with_config(test_config()).expect("failed to create endpoint")
}

/// Endpoint on a simulated clock, for deterministic expiry tests.
pub fn make_sim_endpoint() -> (Endpoint, Arc<SimClock>) {
    let clock = Arc::new(SimClock::starting_at(Timestamp::from_nanos(1_000_000_000)));
    let endpoint = Endpoint::with_config_and_clock(test_config(), clock.clone())
        .expect("failed to create endpoint");
    (endpoint, clock)
}

/// Give background tasks a moment to drain their mailboxes.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `probe` until it returns true or the timeout expires.
pub async fn eventually<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Write a config file with the given contents.
pub fn write_config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("failed to write config");
    file
}
