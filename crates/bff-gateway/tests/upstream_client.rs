use bff_api::ServiceStatus;
use bff_gateway::config::UpstreamConfig;
use bff_gateway::{FailureReason, GatewayMetrics, Upstream, UpstreamClient, UpstreamOutcome};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream(base_url: &str, timeout_ms: u64) -> Upstream {
    let mut cfg = UpstreamConfig::new(base_url);
    cfg.timeout_ms = timeout_ms;
    Upstream::new("order-service", &cfg)
}

fn client() -> UpstreamClient {
    UpstreamClient::new(Duration::from_secs(1), Arc::new(GatewayMetrics::new())).unwrap()
}

#[tokio::test]
async fn get_returns_parsed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/user/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "o-1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client().get(&upstream(&server.uri(), 1_000), "/orders/user/u1").await;
    assert_eq!(outcome, UpstreamOutcome::Success(json!([{"id": "o-1"}])));
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/products/batch"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"product_ids": ["A", "B"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "A"}, {"id": "B"}])))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client()
        .post_json(
            &upstream(&server.uri(), 1_000),
            "/products/batch",
            &json!({"product_ids": ["A", "B"]}),
        )
        .await;
    assert_eq!(outcome.kind(), "success");
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "u1"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let outcome = client().get(&upstream(&server.uri(), 150), "/users/u1").await;
    assert_eq!(
        outcome,
        UpstreamOutcome::Failure(FailureReason::Timeout(Duration::from_millis(150)))
    );
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn error_status_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let outcome = client().get(&upstream(&server.uri(), 1_000), "/orders/user/u1").await;
    assert_eq!(outcome, UpstreamOutcome::Failure(FailureReason::Status(503)));
}

#[tokio::test]
async fn refused_connection_is_a_transport_failure() {
    let outcome = client()
        .get(&upstream("http://127.0.0.1:1", 1_000), "/orders/user/u1")
        .await;
    assert!(matches!(
        outcome,
        UpstreamOutcome::Failure(FailureReason::Transport(_))
    ));
}

#[tokio::test]
async fn empty_and_marker_bodies_are_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/empty"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/marker"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "User not found"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = client();
    let upstream = upstream(&server.uri(), 1_000);
    assert_eq!(
        client.get(&upstream, "/users/empty").await,
        UpstreamOutcome::EmptyOrNotFound
    );
    assert_eq!(
        client.get(&upstream, "/users/marker").await,
        UpstreamOutcome::EmptyOrNotFound
    );
    assert!(matches!(
        client.get(&upstream, "/users/garbled").await,
        UpstreamOutcome::Failure(FailureReason::MalformedPayload(_))
    ));
}

#[tokio::test]
async fn probe_classifies_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let client = client();
    let timeout = Duration::from_millis(500);
    assert_eq!(
        client.probe(&upstream(&server.uri(), 1_000), timeout).await,
        ServiceStatus::Healthy
    );
    assert_eq!(
        client.probe(&upstream(&broken.uri(), 1_000), timeout).await,
        ServiceStatus::Unhealthy
    );
    assert_eq!(
        client
            .probe(&upstream("http://127.0.0.1:1", 1_000), timeout)
            .await,
        ServiceStatus::Unreachable
    );
}
