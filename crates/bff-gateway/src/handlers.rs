use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bff_api::{
    AggregatedResult, ApiError, CacheStatsResponse, HealthResponse, MetricsCounts,
    MetricsSummary, PerformanceSummary, format_hit_rate,
};
use serde_json::json;

use crate::cache::REDIS_BACKEND;
use crate::health::{SERVICE_NAME, check_health};
use crate::server::AppState;

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": SERVICE_NAME,
        "message": "Backend-for-Frontend gateway with profile aggregation",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": crate::now_rfc3339(),
        "endpoints": [
            "GET /health - dependency health",
            "GET /api/profile/{user_id} - aggregated profile",
            "GET /metrics - Prometheus metrics",
            "GET /api/metrics - metrics summary",
            "GET /api/cache/stats - cache statistics"
        ],
    });
    (StatusCode::OK, Json(body))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(check_health(&state.aggregator, state.health_timeout).await)
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<AggregatedResult>, ApiError> {
    let profile = state.aggregator.get_profile(&user_id).await?;
    Ok(Json(profile))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub async fn metrics_summary(State(state): State<AppState>) -> Json<MetricsSummary> {
    let snapshot = state.metrics.snapshot();
    Json(MetricsSummary {
        service: SERVICE_NAME.to_string(),
        timestamp: crate::now_rfc3339(),
        metrics: MetricsCounts {
            requests_total: snapshot.profile_requests,
            cache_hits: snapshot.cache_hits,
            cache_misses: snapshot.cache_misses,
            errors: snapshot.errors_total(),
        },
        performance: PerformanceSummary {
            cache_hit_rate: format_hit_rate(snapshot.cache_hits, snapshot.cache_misses),
            cache_type: state.aggregator.cache().backend_name().to_string(),
            status: "operational".to_string(),
        },
    })
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let cache = state.aggregator.cache();
    let stats = cache.stats(&state.aggregator.key_pattern()).await;
    let snapshot = state.metrics.snapshot();
    let hit_rate = Some(format_hit_rate(snapshot.cache_hits, snapshot.cache_misses));

    let body = if stats.backend == REDIS_BACKEND {
        match stats.entries {
            Some(count) => CacheStatsResponse {
                cache_type: stats.backend.to_string(),
                status: Some("connected".to_string()),
                cached_profiles: Some(count),
                hit_rate,
                ..Default::default()
            },
            None => CacheStatsResponse {
                cache_type: stats.backend.to_string(),
                status: Some("error".to_string()),
                ..Default::default()
            },
        }
    } else {
        CacheStatsResponse {
            cache_type: stats.backend.to_string(),
            cached_items: stats.entries,
            keys: stats.keys,
            hit_rate,
            ..Default::default()
        }
    };
    Json(body)
}
