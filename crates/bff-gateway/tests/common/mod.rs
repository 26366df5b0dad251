#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bff_gateway::{AppConfig, AppState, build_router};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

/// Three mock upstreams plus a gateway wired to them with the local cache.
pub struct Harness {
    pub users: MockServer,
    pub orders: MockServer,
    pub products: MockServer,
    pub state: AppState,
    pub app: Router,
}

pub fn config_for(users: &str, orders: &str, products: &str, timeout_ms: u64) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.redis.enabled = false;
    cfg.upstreams.user.base_url = users.to_string();
    cfg.upstreams.order.base_url = orders.to_string();
    cfg.upstreams.product.base_url = products.to_string();
    cfg.upstreams.user.timeout_ms = timeout_ms;
    cfg.upstreams.order.timeout_ms = timeout_ms;
    cfg.upstreams.product.timeout_ms = timeout_ms;
    cfg.upstreams.health_timeout_ms = 500;
    cfg
}

pub async fn harness() -> Harness {
    harness_with_timeout(2_000).await
}

pub async fn harness_with_timeout(timeout_ms: u64) -> Harness {
    let users = MockServer::start().await;
    let orders = MockServer::start().await;
    let products = MockServer::start().await;

    let cfg = config_for(&users.uri(), &orders.uri(), &products.uri(), timeout_ms);
    let state = AppState::from_config(&cfg).await.expect("build state");
    let app = build_router(state.clone(), cfg.server.body_limit_bytes);

    Harness {
        users,
        orders,
        products,
        state,
        app,
    }
}

impl Harness {
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        get_json(&self.app, uri).await
    }
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub async fn requests_to(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|r| r.len())
        .unwrap_or(0)
}
