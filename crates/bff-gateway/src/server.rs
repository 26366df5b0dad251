use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::aggregator::ProfileAggregator;
use crate::cache::create_cache_backend;
use crate::config::AppConfig;
use crate::metrics::{GatewayMetrics, UPKEEP_INTERVAL};
use crate::upstream::{UpstreamClient, Upstreams};
use crate::{handlers, middleware as app_middleware};

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<ProfileAggregator>,
    pub metrics: Arc<GatewayMetrics>,
    pub health_timeout: Duration,
}

impl AppState {
    /// Wire the gateway components from configuration.
    ///
    /// The cache backend is selected here, once, for the process lifetime.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(GatewayMetrics::new());
        // Ends on its own once the last handle to the metrics is dropped
        metrics.spawn_upkeep(UPKEEP_INTERVAL);
        let cache = create_cache_backend(&cfg.redis, metrics.clone()).await;
        let client = UpstreamClient::new(cfg.upstreams.slow_call_threshold(), metrics.clone())?;
        let aggregator = ProfileAggregator::new(
            client,
            Upstreams::from_config(&cfg.upstreams),
            cache,
            metrics.clone(),
            cfg.cache_ttl(),
            cfg.cache.key_prefix.clone(),
        );

        Ok(Self {
            aggregator: Arc::new(aggregator),
            metrics,
            health_timeout: cfg.upstreams.health_timeout(),
        })
    }
}

pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let state = AppState::from_config(cfg).await?;
    Ok(build_router(state, cfg.server.body_limit_bytes))
}

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/api/metrics", get(handlers::metrics_summary))
        .route("/api/profile/{user_id}", get(handlers::get_profile))
        .route("/api/cache/stats", get(handlers::cache_stats))
        // Runs after routing so the matched route template is available
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::track_metrics,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        // Outermost so the trace span sees the request id
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<GatewayServer> {
        let app = build_app(&self.config).await?;
        Ok(GatewayServer {
            addr: self.addr,
            app,
        })
    }
}

impl GatewayServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
