//! Prometheus metrics for the gateway.
//!
//! This module provides:
//! - HTTP request metrics (count and latency per route template)
//! - Profile aggregation metrics (requests, aggregation latency)
//! - Cache metrics (hit/miss per backend, backend faults)
//! - Upstream metrics (errors per upstream and reason, call latency)
//!
//! Every [`GatewayMetrics`] owns its own Prometheus recorder instead of
//! installing a process-global one, so tests can build isolated instances.
//! Without the global install nothing drains histogram samples between
//! scrapes; [`GatewayMetrics::spawn_upkeep`] does that on a fixed interval.
//! Updates go to atomics and lock-free recorder handles only; nothing here
//! can block or fail the request path.

use dashmap::DashMap;
use metrics::{Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Period of histogram upkeep, matching the exporter's own default.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Aggregation metrics
    pub const PROFILE_REQUESTS_TOTAL: &str = "profile_requests_total";
    pub const AGGREGATION_DURATION_SECONDS: &str = "aggregation_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_BACKEND_ERRORS_TOTAL: &str = "cache_backend_errors_total";

    // Upstream metrics
    pub const UPSTREAM_ERRORS_TOTAL: &str = "upstream_errors_total";
    pub const UPSTREAM_REQUEST_DURATION_SECONDS: &str = "upstream_request_duration_seconds";
}

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Process-wide counters and histograms, shared through `Arc`.
pub struct GatewayMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    profile_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_backend_errors: AtomicU64,
    upstream_errors: DashMap<String, AtomicU64>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub profile_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_backend_errors: u64,
    pub upstream_errors: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Upstream failures plus cache backend faults.
    pub fn errors_total(&self) -> u64 {
        self.upstream_errors.values().sum::<u64>() + self.cache_backend_errors
    }

    pub fn upstream_errors_for(&self, upstream: &str) -> u64 {
        self.upstream_errors.get(upstream).copied().unwrap_or(0)
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMetrics {
    pub fn new() -> Self {
        // build_recorder() keeps the recorder local; /metrics renders it ourselves
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            recorder,
            handle,
            profile_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_backend_errors: AtomicU64::new(0),
            upstream_errors: DashMap::new(),
        }
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Fold pending histogram samples into their summaries.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    /// Run [`Self::run_upkeep`] every `period` until the metrics are dropped.
    pub fn spawn_upkeep(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(metrics) = weak.upgrade() else {
                    break;
                };
                metrics.run_upkeep();
            }
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            profile_requests: self.profile_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_backend_errors: self.cache_backend_errors.load(Ordering::Relaxed),
            upstream_errors: self
                .upstream_errors
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }

    fn increment(&self, name: &'static str, labels: Vec<Label>) {
        let key = Key::from_parts(name, labels);
        self.recorder.register_counter(&key, &METADATA).increment(1);
    }

    fn observe(&self, name: &'static str, labels: Vec<Label>, duration: Duration) {
        let key = Key::from_parts(name, labels);
        self.recorder
            .register_histogram(&key, &METADATA)
            .record(duration.as_secs_f64());
    }

    // =========================================================================
    // HTTP Metrics
    // =========================================================================

    /// Record an HTTP request. `endpoint` is the matched route template.
    pub fn record_http_request(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        duration: Duration,
    ) {
        self.increment(
            names::HTTP_REQUESTS_TOTAL,
            vec![
                Label::new("method", method.to_string()),
                Label::new("endpoint", endpoint.to_string()),
                Label::new("status", status.to_string()),
            ],
        );
        self.observe(
            names::HTTP_REQUEST_DURATION_SECONDS,
            vec![
                Label::new("method", method.to_string()),
                Label::new("endpoint", endpoint.to_string()),
            ],
            duration,
        );
    }

    // =========================================================================
    // Aggregation Metrics
    // =========================================================================

    pub fn record_profile_request(&self) {
        self.profile_requests.fetch_add(1, Ordering::Relaxed);
        self.increment(names::PROFILE_REQUESTS_TOTAL, Vec::new());
    }

    /// Duration of the upstream fan-out only (cache misses).
    pub fn record_aggregation(&self, duration: Duration) {
        self.observe(names::AGGREGATION_DURATION_SECONDS, Vec::new(), duration);
    }

    // =========================================================================
    // Cache Metrics
    // =========================================================================

    pub fn record_cache_hit(&self, backend: &'static str) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.increment(names::CACHE_HITS_TOTAL, vec![Label::new("backend", backend)]);
    }

    pub fn record_cache_miss(&self, backend: &'static str) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.increment(names::CACHE_MISSES_TOTAL, vec![Label::new("backend", backend)]);
    }

    /// Record an absorbed cache backend fault (`get`, `put`, `decode`, `stats`).
    pub fn record_cache_error(&self, backend: &'static str, operation: &'static str) {
        self.cache_backend_errors.fetch_add(1, Ordering::Relaxed);
        self.increment(
            names::CACHE_BACKEND_ERRORS_TOTAL,
            vec![
                Label::new("backend", backend),
                Label::new("operation", operation),
            ],
        );
    }

    // =========================================================================
    // Upstream Metrics
    // =========================================================================

    pub fn record_upstream_error(&self, upstream: &str, reason: &'static str) {
        self.upstream_errors
            .entry(upstream.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.increment(
            names::UPSTREAM_ERRORS_TOTAL,
            vec![
                Label::new("upstream", upstream.to_string()),
                Label::new("reason", reason),
            ],
        );
    }

    pub fn record_upstream_latency(&self, upstream: &str, duration: Duration) {
        self.observe(
            names::UPSTREAM_REQUEST_DURATION_SECONDS,
            vec![Label::new("upstream", upstream.to_string())],
            duration,
        );
    }
}
