use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream data services
    #[serde(default)]
    pub upstreams: UpstreamsConfig,
    /// Redis configuration (networked cache backend)
    #[serde(default)]
    pub redis: RedisConfig,
    /// Profile cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Upstream validations
        for (name, upstream) in [
            ("user", &self.upstreams.user),
            ("order", &self.upstreams.order),
            ("product", &self.upstreams.product),
        ] {
            if upstream.base_url.trim().is_empty() {
                return Err(format!("upstreams.{name}.base_url must not be empty"));
            }
            if upstream.timeout_ms == 0 {
                return Err(format!("upstreams.{name}.timeout_ms must be > 0"));
            }
        }
        if self.upstreams.health_timeout_ms == 0 {
            return Err("upstreams.health_timeout_ms must be > 0".into());
        }
        // Cache validations
        if self.cache.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".into());
        }
        if self.cache.key_prefix.is_empty() {
            return Err("cache.key_prefix must not be empty".into());
        }
        if self.redis.enabled && self.redis.timeout_ms == 0 {
            return Err("redis.timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        let fmt = self.logging.format.to_ascii_lowercase();
        if fmt != "pretty" && fmt != "json" {
            return Err("logging.format must be one of [\"pretty\", \"json\"]".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// A single upstream data service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL without trailing slash, e.g. `http://user-service:8001`
    pub base_url: String,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: default_upstream_timeout_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_upstream_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    #[serde(default = "default_user_upstream")]
    pub user: UpstreamConfig,
    #[serde(default = "default_order_upstream")]
    pub order: UpstreamConfig,
    #[serde(default = "default_product_upstream")]
    pub product: UpstreamConfig,
    /// Timeout for `/health` probes in milliseconds
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    /// Calls slower than this are logged at WARN
    #[serde(default = "default_slow_call_threshold_ms")]
    pub slow_call_threshold_ms: u64,
}

fn default_user_upstream() -> UpstreamConfig {
    UpstreamConfig::new("http://user-service:8001")
}
fn default_order_upstream() -> UpstreamConfig {
    UpstreamConfig::new("http://order-service:8002")
}
fn default_product_upstream() -> UpstreamConfig {
    UpstreamConfig::new("http://product-service:8003")
}
fn default_health_timeout_ms() -> u64 {
    2000
}
fn default_slow_call_threshold_ms() -> u64 {
    1000
}

impl UpstreamsConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            user: default_user_upstream(),
            order: default_order_upstream(),
            product: default_product_upstream(),
            health_timeout_ms: default_health_timeout_ms(),
            slow_call_threshold_ms: default_slow_call_threshold_ms(),
        }
    }
}

/// Redis configuration for the shared cache backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Try Redis at startup (falls back to the local cache when unreachable)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379/0")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection and command timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    true
}

fn default_redis_url() -> String {
    "redis://redis:6379/0".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    1000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Profile cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window of aggregated profiles in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Namespace of profile keys (`{prefix}:{id}`)
    #[serde(default = "default_cache_key_prefix")]
    pub key_prefix: String,
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_cache_key_prefix() -> String {
    "profile".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            key_prefix: default_cache_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "bff.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., BFF__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("BFF")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().expect("default config validates");
        assert_eq!(cfg.cache.ttl_secs, 30);
        assert_eq!(cfg.cache.key_prefix, "profile");
        assert_eq!(cfg.upstreams.user.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.upstreams.health_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.addr().port(), 8000);
    }

    #[test]
    fn rejects_zero_ttl() {
        let mut cfg = AppConfig::default();
        cfg.cache.ttl_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_upstream_url() {
        let mut cfg = AppConfig::default();
        cfg.upstreams.product.base_url = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("upstreams.product.base_url"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let mut cfg = AppConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.validate().is_err());
    }
}
