//! Metrics collection for Quill
//!
//! This module provides Prometheus metrics for observability.
//! Connection counts and drop counters are operational signals only; no
//! component reads them back to make decisions.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for Quill
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub coordinator: CoordinatorMetrics,
    pub worker: WorkerMetrics,
}

/// Connection multiplexer metrics
#[derive(Debug, Clone)]
pub struct CoordinatorMetrics {
    /// Currently open connections
    pub active_connections: IntGauge,

    /// Connections accepted since start
    pub connections_total: IntCounter,

    /// Generate requests forwarded to the worker
    pub requests_enqueued: IntCounter,

    /// Client messages discarded as malformed
    pub malformed_messages: IntCounter,

    /// Keep-alive acknowledgements received
    pub keep_alives: IntCounter,

    /// Results sent to their connection
    pub results_delivered: IntCounter,

    /// Results whose connection was gone
    pub results_dropped: IntCounter,
}

/// Generation worker metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Requests waiting for the worker
    pub queue_depth: IntGauge,

    /// Time a request spends queued before decoding starts
    pub queue_time: Histogram,

    /// Full request decode duration
    pub generation_duration: Histogram,

    /// Single forward pass duration
    pub forward_duration: Histogram,

    /// Tokens generated total
    pub tokens_generated_total: IntCounter,

    /// Requests completed
    pub requests_completed: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge definition");
    registry
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("valid histogram definition");
    registry
        .register(Box::new(histogram.clone()))
        .expect("histogram registered once");
    histogram
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let coordinator = CoordinatorMetrics {
            active_connections: gauge(
                &registry,
                "coordinator_active_connections",
                "Current number of open client connections",
            ),
            connections_total: counter(
                &registry,
                "coordinator_connections_total",
                "Total number of accepted client connections",
            ),
            requests_enqueued: counter(
                &registry,
                "coordinator_requests_enqueued_total",
                "Total number of generate requests forwarded to the worker",
            ),
            malformed_messages: counter(
                &registry,
                "coordinator_malformed_messages_total",
                "Total number of discarded malformed client messages",
            ),
            keep_alives: counter(
                &registry,
                "coordinator_keep_alives_total",
                "Total number of keep-alive acknowledgements received",
            ),
            results_delivered: counter(
                &registry,
                "coordinator_results_delivered_total",
                "Total number of results delivered to their connection",
            ),
            results_dropped: counter(
                &registry,
                "coordinator_results_dropped_total",
                "Total number of results dropped because the connection was gone",
            ),
        };

        let worker = WorkerMetrics {
            queue_depth: gauge(
                &registry,
                "worker_queue_depth",
                "Current depth of the generation request queue",
            ),
            queue_time: histogram(
                &registry,
                "worker_queue_time_seconds",
                "Time requests spend in queue before processing",
                vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0],
            ),
            generation_duration: histogram(
                &registry,
                "worker_generation_duration_seconds",
                "Full request generation duration in seconds",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            ),
            forward_duration: histogram(
                &registry,
                "worker_forward_duration_seconds",
                "Worker forward pass duration in seconds",
                vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1],
            ),
            tokens_generated_total: counter(
                &registry,
                "worker_tokens_generated_total",
                "Total number of tokens generated",
            ),
            requests_completed: counter(
                &registry,
                "worker_requests_completed_total",
                "Total number of requests that produced a response",
            ),
        };

        MetricsRegistry {
            registry,
            coordinator,
            worker,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}
