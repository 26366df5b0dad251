//! Upstream reachability and cache backend health for `/health`.

use bff_api::{HealthResponse, ServiceStatus};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::aggregator::ProfileAggregator;
use crate::cache::LOCAL_BACKEND;

pub const SERVICE_NAME: &str = "api-gateway";

/// Probe every upstream concurrently and report the cache backend.
///
/// Always reports the gateway itself as healthy: the body describes the
/// dependencies, not whether profiles can currently be served.
pub async fn check_health(aggregator: &ProfileAggregator, probe_timeout: Duration) -> HealthResponse {
    let upstreams = aggregator.upstreams().all();
    let client = aggregator.client();

    let statuses = join_all(
        upstreams
            .iter()
            .map(|upstream| client.probe(upstream, probe_timeout)),
    )
    .await;

    let services: BTreeMap<String, ServiceStatus> = upstreams
        .iter()
        .zip(statuses)
        .map(|(upstream, status)| (health_key(upstream.name), status))
        .collect();

    let cache = aggregator.cache();
    let cache_status = if cache.backend_name() == LOCAL_BACKEND {
        "ok"
    } else if cache.is_available().await {
        "connected"
    } else {
        "error"
    };

    HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: crate::now_rfc3339(),
        services,
        cache: cache.backend_name().to_string(),
        cache_status: cache_status.to_string(),
    }
}

/// `user-service` -> `user_service`
fn health_key(name: &str) -> String {
    name.replace('-', "_")
}
