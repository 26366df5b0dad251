pub mod aggregator;
pub mod cache;
pub mod config;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod upstream;

pub use aggregator::{AggregationError, ProfileAggregator};
pub use cache::{CacheBackend, CacheStore, CacheWrite, create_cache_backend};
pub use config::{AppConfig, CacheConfig, LoggingConfig, RedisConfig, ServerConfig, UpstreamsConfig};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use observability::init_tracing;
pub use server::{AppState, GatewayServer, ServerBuilder, build_app, build_router};
pub use upstream::{FailureReason, Upstream, UpstreamClient, UpstreamOutcome, Upstreams};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC time as RFC 3339, used in response bodies.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
