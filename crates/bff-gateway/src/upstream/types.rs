//! Upstream service descriptors and call outcomes.

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::config::{UpstreamConfig, UpstreamsConfig};

/// One upstream data service.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Name used in logs and metric labels, e.g. `user-service`.
    pub name: &'static str,
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Upstream {
    pub fn new(name: &'static str, config: &UpstreamConfig) -> Self {
        Self {
            name,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        }
    }

    /// Absolute URL for `path` (which starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// The fixed set of services a profile fans out to.
#[derive(Debug, Clone)]
pub struct Upstreams {
    pub user: Upstream,
    pub order: Upstream,
    pub product: Upstream,
}

impl Upstreams {
    pub fn from_config(config: &UpstreamsConfig) -> Self {
        Self {
            user: Upstream::new("user-service", &config.user),
            order: Upstream::new("order-service", &config.order),
            product: Upstream::new("product-service", &config.product),
        }
    }

    pub fn all(&self) -> [&Upstream; 3] {
        [&self.user, &self.order, &self.product]
    }
}

/// Result of a single upstream call. Owned by the call site.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    Success(Value),
    /// 2xx with nothing usable: `null`, `[]`, an empty body or an
    /// `{"error": ...}` not-found marker.
    EmptyOrNotFound,
    Failure(FailureReason),
}

impl UpstreamOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::EmptyOrNotFound => "empty",
            Self::Failure(_) => "failure",
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failure(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl FailureReason {
    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Status(_) => "status",
            Self::Transport(_) => "transport",
            Self::MalformedPayload(_) => "malformed_payload",
        }
    }
}

/// Classify a completed HTTP exchange.
pub fn classify(status: StatusCode, body: &[u8]) -> UpstreamOutcome {
    if !status.is_success() {
        return UpstreamOutcome::Failure(FailureReason::Status(status.as_u16()));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return UpstreamOutcome::EmptyOrNotFound;
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => UpstreamOutcome::EmptyOrNotFound,
        Ok(Value::Array(items)) if items.is_empty() => UpstreamOutcome::EmptyOrNotFound,
        Ok(Value::Object(map)) if map.contains_key("error") => UpstreamOutcome::EmptyOrNotFound,
        Ok(value) => UpstreamOutcome::Success(value),
        Err(e) => UpstreamOutcome::Failure(FailureReason::MalformedPayload(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_payload() {
        let outcome = classify(StatusCode::OK, br#"{"id":"user123","name":"Ivan"}"#);
        assert_eq!(
            outcome,
            UpstreamOutcome::Success(json!({"id": "user123", "name": "Ivan"}))
        );
    }

    #[test]
    fn embedded_not_found_marker_is_empty() {
        let outcome = classify(StatusCode::OK, r#"{"error":"User not found"}"#.as_bytes());
        assert_eq!(outcome, UpstreamOutcome::EmptyOrNotFound);
    }

    #[test]
    fn null_and_empty_bodies_are_empty() {
        assert_eq!(classify(StatusCode::OK, b"null"), UpstreamOutcome::EmptyOrNotFound);
        assert_eq!(classify(StatusCode::OK, b"[]"), UpstreamOutcome::EmptyOrNotFound);
        assert_eq!(classify(StatusCode::NO_CONTENT, b""), UpstreamOutcome::EmptyOrNotFound);
    }

    #[test]
    fn non_success_status_is_failure() {
        let outcome = classify(StatusCode::NOT_FOUND, br#"{"detail":"Not Found"}"#);
        assert_eq!(outcome, UpstreamOutcome::Failure(FailureReason::Status(404)));
        assert_eq!(outcome.kind(), "failure");
        assert_eq!(outcome.failure().map(FailureReason::label), Some("status"));
    }

    #[test]
    fn unparseable_body_is_malformed() {
        let outcome = classify(StatusCode::OK, b"<html>oops</html>");
        assert!(matches!(
            outcome,
            UpstreamOutcome::Failure(FailureReason::MalformedPayload(_))
        ));
    }

    #[test]
    fn upstream_url_joins_without_double_slash() {
        let upstream = Upstream::new("user-service", &UpstreamConfig::new("http://users:8001/"));
        assert_eq!(upstream.url("/users/1"), "http://users:8001/users/1");
        assert_eq!(upstream.timeout, Duration::from_secs(5));
    }
}
