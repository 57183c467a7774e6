//! Prometheus metrics for the dispatch pipeline
//!
//! Dispatches are labeled by resolved route name rather than raw path, which
//! keeps label cardinality bounded by the route table. Unmatched requests
//! are labeled "unmatched" and gated rejections "gated".

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    dispatch_counter: CounterVec,
    dispatch_latency: HistogramVec,
    total_requests: Arc<AtomicU64>,
    total_errors: Arc<AtomicU64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_counter = CounterVec::new(
            Opts::new("gateway_dispatches_total", "Total number of dispatches"),
            &["method", "route", "status"],
        )
        .expect("Failed to create dispatch counter");

        let dispatch_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_dispatch_latency_seconds",
                "Dispatch latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "route"],
        )
        .expect("Failed to create latency histogram");

        registry
            .register(Box::new(dispatch_counter.clone()))
            .expect("Failed to register dispatch counter");
        registry
            .register(Box::new(dispatch_latency.clone()))
            .expect("Failed to register latency histogram");

        Self {
            registry,
            dispatch_counter,
            dispatch_latency,
            total_requests: Arc::new(AtomicU64::new(0)),
            total_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one completed dispatch with its outcome and latency
    pub fn record_dispatch(&self, method: &str, route: &str, status: u16, latency: Duration) {
        let status_str = status.to_string();

        self.dispatch_counter
            .with_label_values(&[method, route, &status_str])
            .inc();
        self.dispatch_latency
            .with_label_values(&[method, route])
            .observe(latency.as_secs_f64());

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Prometheus text exposition of all registered metrics
    pub fn prometheus_output(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
