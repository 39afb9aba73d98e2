//! Metric collection and Prometheus exposition.
//!
//! Counters and gauges live in a process-wide registry and are exported in
//! the Prometheus text format. When a metrics port is configured (usually
//! via `BROKER_METRICS_PORT`), a minimal HTTP responder serves the current
//! snapshot to any request on that port.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named metrics.
///
/// Metric names use dotted namespaces (`broker.core.messages_published`);
/// the exporter rewrites dots to underscores for Prometheus.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    gauges: RwLock<BTreeMap<String, Arc<Gauge>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create a counter.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::default())),
        )
    }

    /// Look up or create a gauge.
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        if let Some(gauge) = self.gauges.read().get(name) {
            return Arc::clone(gauge);
        }
        let mut gauges = self.gauges.write();
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Gauge::default())),
        )
    }

    /// Render all metrics in the Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, counter) in self.counters.read().iter() {
            let prom_name = name.replace('.', "_");
            out.push_str(&format!("# TYPE {} counter\n", prom_name));
            out.push_str(&format!("{} {}\n", prom_name, counter.value()));
        }
        for (name, gauge) in self.gauges.read().iter() {
            let prom_name = name.replace('.', "_");
            out.push_str(&format!("# TYPE {} gauge\n", prom_name));
            out.push_str(&format!("{} {}\n", prom_name, gauge.value()));
        }
        out
    }
}

/// Serve the registry on `port` until the task is dropped.
///
/// Responds to every HTTP request on the port with the current snapshot;
/// paths are not inspected beyond draining the request head.
pub async fn serve(registry: Arc<MetricsRegistry>, port: u16) {
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(port, error = %e, "failed to bind metrics endpoint");
            return;
        }
    };
    info!(port, "metrics endpoint up");
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            continue;
        };
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            // Drain whatever request head fits; we answer regardless.
            let _ = stream.read(&mut buf).await;
            let body = registry.export_prometheus();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let registry = MetricsRegistry::new();
        let counter = registry.counter("broker.core.messages_published");
        counter.increment();
        counter.increment_by(4);
        assert_eq!(counter.value(), 5);

        // The same name yields the same counter.
        assert_eq!(registry.counter("broker.core.messages_published").value(), 5);
    }

    #[test]
    fn test_gauges_move_both_ways() {
        let registry = MetricsRegistry::new();
        let gauge = registry.gauge("broker.core.peers");
        gauge.set(3);
        gauge.increment();
        gauge.decrement();
        gauge.decrement();
        assert_eq!(gauge.value(), 2);
    }

    #[test]
    fn test_prometheus_export_rewrites_names() {
        let registry = MetricsRegistry::new();
        registry.counter("broker.core.messages_published").increment();
        registry.gauge("broker.core.peers").set(1);

        let out = registry.export_prometheus();
        assert!(out.contains("# TYPE broker_core_messages_published counter"));
        assert!(out.contains("broker_core_messages_published 1"));
        assert!(out.contains("# TYPE broker_core_peers gauge"));
        assert!(out.contains("broker_core_peers 1"));
    }
}
