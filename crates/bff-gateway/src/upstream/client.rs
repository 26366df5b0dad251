//! Outbound HTTP client for upstream services.

use bff_api::ServiceStatus;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::types::{FailureReason, Upstream, UpstreamOutcome, classify};
use crate::metrics::GatewayMetrics;

/// Issues single-attempt, time-bounded calls and classifies every outcome.
///
/// No error escapes [`UpstreamClient::call`]: transport faults, timeouts,
/// bad statuses and unparseable bodies all come back as
/// [`UpstreamOutcome::Failure`]. There are no retries.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    slow_call_threshold: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl UpstreamClient {
    pub fn new(
        slow_call_threshold: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bff-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, slow_call_threshold, metrics))
    }

    pub fn with_client(
        http: reqwest::Client,
        slow_call_threshold: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            http,
            slow_call_threshold,
            metrics,
        }
    }

    /// `GET {upstream}{path}` with the upstream's own timeout.
    pub async fn get(&self, upstream: &Upstream, path: &str) -> UpstreamOutcome {
        self.call(upstream, Method::GET, path, None, upstream.timeout)
            .await
    }

    /// `POST {upstream}{path}` with a JSON body and the upstream's own timeout.
    pub async fn post_json(&self, upstream: &Upstream, path: &str, body: &Value) -> UpstreamOutcome {
        self.call(upstream, Method::POST, path, Some(body), upstream.timeout)
            .await
    }

    #[instrument(skip(self, upstream, body), fields(upstream = upstream.name))]
    pub async fn call(
        &self,
        upstream: &Upstream,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> UpstreamOutcome {
        let started = Instant::now();

        let mut request = self
            .http
            .request(method.clone(), upstream.url(path))
            .timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let outcome = match request.send().await {
            Ok(response) => {
                let status = response.status();
                match response.bytes().await {
                    Ok(bytes) => classify(status, &bytes),
                    Err(e) => UpstreamOutcome::Failure(failure_from(&e, timeout)),
                }
            }
            Err(e) => UpstreamOutcome::Failure(failure_from(&e, timeout)),
        };

        let latency = started.elapsed();
        self.metrics.record_upstream_latency(upstream.name, latency);
        let latency_ms = latency.as_millis() as u64;

        if latency > self.slow_call_threshold {
            warn!(
                upstream = upstream.name,
                %method,
                path,
                latency_ms,
                outcome = outcome.kind(),
                reason = ?outcome.failure(),
                "slow upstream call"
            );
        } else if let Some(reason) = outcome.failure() {
            warn!(
                upstream = upstream.name,
                %method,
                path,
                latency_ms,
                outcome = outcome.kind(),
                reason = %reason,
                "upstream call failed"
            );
        } else {
            debug!(
                upstream = upstream.name,
                %method,
                path,
                latency_ms,
                outcome = outcome.kind(),
                "upstream call completed"
            );
        }

        outcome
    }

    /// Probe `GET {upstream}/health`: 200 is healthy, any other status is
    /// unhealthy, no response at all is unreachable.
    pub async fn probe(&self, upstream: &Upstream, timeout: Duration) -> ServiceStatus {
        let response = self
            .http
            .get(upstream.url("/health"))
            .timeout(timeout)
            .send()
            .await;

        match response {
            Ok(r) if r.status() == reqwest::StatusCode::OK => ServiceStatus::Healthy,
            Ok(r) => {
                debug!(upstream = upstream.name, status = %r.status(), "health probe unhealthy");
                ServiceStatus::Unhealthy
            }
            Err(e) => {
                debug!(upstream = upstream.name, error = %e, "health probe unreachable");
                ServiceStatus::Unreachable
            }
        }
    }
}

fn failure_from(e: &reqwest::Error, timeout: Duration) -> FailureReason {
    if e.is_timeout() {
        FailureReason::Timeout(timeout)
    } else if e.is_decode() || e.is_body() {
        FailureReason::MalformedPayload(e.to_string())
    } else {
        FailureReason::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn slow_failed_call_logs_its_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        // Every call counts as slow
        let client = UpstreamClient::new(Duration::ZERO, Arc::new(GatewayMetrics::new())).unwrap();
        let upstream = Upstream {
            name: "order-service",
            base_url: server.uri(),
            timeout: Duration::from_secs(1),
        };
        let outcome = client.get(&upstream, "/orders/user/u1").await;
        assert_eq!(outcome, UpstreamOutcome::Failure(FailureReason::Status(503)));

        let text = logs.text();
        assert!(text.contains("slow upstream call"), "{text}");
        assert!(text.contains("Status(503)"), "{text}");
    }
}
