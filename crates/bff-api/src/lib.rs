use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

// -------------------------
// Composite profile
// -------------------------

/// Composite profile assembled from the user, order and product services.
///
/// `user` is always present: a profile without its primary entity is never
/// built. `orders` keeps the upstream order (duplicates included) and
/// `products` is keyed by product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub user: Value,
    #[serde(default)]
    pub orders: Vec<Value>,
    #[serde(default)]
    pub products: BTreeMap<String, Value>,
    pub metadata: ProfileMetadata,
}

impl AggregatedResult {
    /// Mark this result as served verbatim from the cache.
    ///
    /// Timings are left untouched so they keep describing the original
    /// aggregation.
    pub fn into_cached(mut self) -> Self {
        self.metadata.cached = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub user_id: String,
    pub orders_count: usize,
    pub products_count: usize,
    /// RFC 3339 timestamp of the aggregation that produced this result.
    pub aggregated_at: String,
    /// Freshness window in seconds.
    pub cache_ttl: u64,
    pub cached: bool,
    /// Number of upstream calls actually issued (2 or 3).
    pub services_used: u32,
    pub timings: PhaseTimings,
}

/// Per-phase wall-clock timings in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    /// Concurrent user + orders fetch.
    pub fanout_ms: f64,
    /// Batch product lookup (0 when skipped).
    pub batch_ms: f64,
    pub total_ms: f64,
}

// -------------------------
// Operational endpoints
// -------------------------

/// Reachability of one upstream as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
    pub services: BTreeMap<String, ServiceStatus>,
    /// `redis` or `in_memory`.
    pub cache: String,
    /// `connected`, `error` or `ok` (local backend).
    pub cache_status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub cache_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_profiles: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub service: String,
    pub timestamp: String,
    pub metrics: MetricsCounts,
    pub performance: PerformanceSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsCounts {
    pub requests_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Formatted as `"NN.N%"`.
    pub cache_hit_rate: String,
    pub cache_type: String,
    pub status: String,
}

/// Format a hit rate the way the summary endpoints report it.
pub fn format_hit_rate(hits: u64, misses: u64) -> String {
    let total = hits + misses;
    let rate = if total > 0 {
        hits as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    format!("{rate:.1}%")
}

// -------------------------
// Errors
// -------------------------

/// Client-visible gateway errors.
///
/// Messages are written for end users; they never carry upstream names,
/// URLs or timeout values.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();
        (status, Json(ErrorBody { detail: &detail })).into_response()
    }
}
