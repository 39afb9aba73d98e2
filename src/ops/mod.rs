//! Operational concerns: logging and metrics.

pub mod metrics;
pub mod telemetry;

pub use metrics::MetricsRegistry;
