use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

use crate::server::AppState;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    // Preserve a valid incoming request id; otherwise generate one
    let req_id_value = req
        .headers()
        .get(&REQUEST_ID)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let Some(req_id_value) = req_id_value else {
        return next.run(req).await;
    };

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(REQUEST_ID, req_id_value);
    res
}

// Records request count and latency per (method, route template, status)
pub async fn track_metrics(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    // Route templates keep label cardinality bounded
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let res = next.run(req).await;

    state
        .metrics
        .record_http_request(&method, &endpoint, res.status().as_u16(), started.elapsed());
    res
}
