//! Tests for configuration, clocks, and identity.

mod common;

use broker::core::config::{Config, Verbosity};
use broker::core::id::NodeId;
use broker::core::time::{Clock, SimClock, Timespan, Timestamp};
use common::write_config_file;
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn config_defaults() {
    let config = Config::default();
    assert!(!config.options.disable_ssl);
    assert!(config.options.forward);
    assert_eq!(config.options.ttl, 20);
    assert!(config.options.use_real_time);
    assert_eq!(config.channel.ack_interval, 1);
    assert_eq!(config.channel.nack_timeout, 5);
    assert!(config.metrics.port.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn config_from_file() {
    let file = write_config_file(
        r#"
[options]
forward = false
ttl = 5

[logger]
console_verbosity = "debug"

[channel]
tick_interval_ms = 50
ack_interval = 2
nack_timeout = 10

[metrics]
port = 9100
"#,
    );
    let config = Config::from_file(file.path()).expect("failed to load config");
    assert!(!config.options.forward);
    assert_eq!(config.options.ttl, 5);
    assert_eq!(config.logger.console_verbosity, Verbosity::Debug);
    assert_eq!(config.channel.tick_interval_ms, 50);
    assert_eq!(config.channel.ack_interval, 2);
    assert_eq!(config.channel.nack_timeout, 10);
    assert_eq!(config.metrics.port, Some(9100));
    assert!(config.validate().is_ok());
}

#[test]
fn config_rejects_bad_channel_settings() {
    let file = write_config_file("[channel]\nack_interval = 0\n");
    let config = Config::from_file(file.path()).expect("failed to load config");
    assert!(config.validate().is_err());
}

#[test]
fn config_rejects_cert_without_key() {
    let file = write_config_file("[openssl]\ncertificate = \"cert.pem\"\n");
    let config = Config::from_file(file.path()).expect("failed to load config");
    assert!(config.validate().is_err());
}

#[test]
fn config_env_overrides() {
    // This is the only test touching these variables; clean up afterwards.
    std::env::set_var("BROKER_CONSOLE_VERBOSITY", "trace");
    std::env::set_var("BROKER_METRICS_PORT", "9191");
    std::env::set_var("BROKER_OUTPUT_GENERATOR_FILE_CAP", "100");
    let mut config = Config::default();
    config.apply_env();
    std::env::remove_var("BROKER_CONSOLE_VERBOSITY");
    std::env::remove_var("BROKER_METRICS_PORT");
    std::env::remove_var("BROKER_OUTPUT_GENERATOR_FILE_CAP");

    assert_eq!(config.logger.console_verbosity, Verbosity::Trace);
    assert_eq!(config.metrics.port, Some(9191));
    assert_eq!(config.recording.output_generator_file_cap, Some(100));
}

#[test]
fn verbosity_parsing() {
    assert_eq!(Verbosity::parse("trace"), Some(Verbosity::Trace));
    assert_eq!(Verbosity::parse("WARNING"), Some(Verbosity::Warning));
    assert_eq!(Verbosity::parse("warn"), Some(Verbosity::Warning));
    assert_eq!(Verbosity::parse("loud"), None);
}

// ============================================================================
// Time
// ============================================================================

#[test]
fn timespan_arithmetic() {
    let span = Timespan::from_millis(250);
    assert_eq!(span.as_nanos(), 250_000_000);
    assert_eq!(span + Timespan::from_millis(250), Timespan::from_millis(500));
    assert!(Timespan::from_nanos(-1).is_negative());
    assert_eq!(Timespan::from_nanos(-1).to_duration(), std::time::Duration::ZERO);

    let t0 = Timestamp::from_nanos(1_000);
    let t1 = t0 + Timespan::from_nanos(500);
    assert_eq!(t1.as_nanos(), 1_500);
    assert_eq!(t1.since(t0), Timespan::from_nanos(500));
    assert!(t0.since(t1).is_negative());
}

#[test]
fn sim_clock_fires_in_due_order() {
    let clock = SimClock::default();
    let fired = Arc::new(Mutex::new(Vec::new()));

    for (label, delay_ms) in [("c", 300), ("a", 100), ("b", 200)] {
        let fired = Arc::clone(&fired);
        clock.send_later(
            Timespan::from_millis(delay_ms),
            Box::new(move || fired.lock().push(label)),
        );
    }
    assert_eq!(clock.pending_timers(), 3);

    clock.advance(Timespan::from_millis(150));
    assert_eq!(*fired.lock(), vec!["a"]);
    assert_eq!(clock.pending_timers(), 2);

    clock.advance(Timespan::from_millis(200));
    assert_eq!(*fired.lock(), vec!["a", "b", "c"]);
    assert_eq!(clock.pending_timers(), 0);
}

#[test]
fn sim_clock_callbacks_can_reschedule() {
    let clock = Arc::new(SimClock::default());
    let fired = Arc::new(Mutex::new(0u32));

    let clock2 = Arc::clone(&clock);
    let fired2 = Arc::clone(&fired);
    clock.send_later(
        Timespan::from_millis(10),
        Box::new(move || {
            *fired2.lock() += 1;
            let fired3 = Arc::clone(&fired2);
            clock2.send_later(
                Timespan::from_millis(10),
                Box::new(move || *fired3.lock() += 1),
            );
        }),
    );

    clock.advance(Timespan::from_millis(50));
    assert_eq!(*fired.lock(), 2);
}

#[test]
fn sim_clock_now_advances_monotonically() {
    let clock = SimClock::starting_at(Timestamp::from_nanos(100));
    assert_eq!(clock.now(), Timestamp::from_nanos(100));
    clock.advance(Timespan::from_nanos(50));
    assert_eq!(clock.now(), Timestamp::from_nanos(150));
    clock.advance_to(Timestamp::from_nanos(120));
    assert_eq!(clock.now(), Timestamp::from_nanos(150));
}

// ============================================================================
// Identity
// ============================================================================

#[test]
fn node_ids_are_distinct() {
    let a = NodeId::generate();
    let b = NodeId::generate();
    assert_ne!(a, NodeId::NIL);
    assert_ne!(a, b);
}
