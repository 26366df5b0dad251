//! Cache-aside store for aggregated profiles.
//!
//! ## Backends
//!
//! - **Redis**: shared across gateway replicas, expiry enforced by `SETEX`
//! - **Local**: per-process DashMap, expiry checked on every read and swept
//!   periodically on writes
//!
//! The backend is chosen once at startup by [`create_cache_backend`]. If the
//! Redis probe fails the local backend is used for the rest of the process
//! lifetime; there is no re-probing and no failover back.

pub mod backend;

pub use backend::{
    CacheBackend, CacheError, CacheStats, CacheStore, CacheWrite, CachedEntry, LOCAL_BACKEND,
    LOCAL_SWEEP_INTERVAL, LocalCache, REDIS_BACKEND,
};

use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::metrics::GatewayMetrics;

/// Create the cache store based on configuration.
///
/// - **Redis disabled**: local cache
/// - **Redis enabled**: probe Redis, fall back to local cache on failure
pub async fn create_cache_backend(config: &RedisConfig, metrics: Arc<GatewayMetrics>) -> CacheStore {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory cache");
        return CacheStore::new_local(metrics);
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-memory cache."
            );
            return CacheStore::new_local(metrics);
        }
    };

    // Connectivity probe, bounded even if the pool timeouts are not honoured
    match tokio::time::timeout(timeout, pool.get()).await {
        Ok(Ok(_)) => {
            tracing::info!("Connected to Redis, using shared cache");
            CacheStore::new_redis(pool, timeout, metrics)
        }
        Ok(Err(e)) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory cache."
            );
            CacheStore::new_local(metrics)
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = config.timeout_ms,
                "Redis probe timed out. Falling back to in-memory cache."
            );
            CacheStore::new_local(metrics)
        }
    }
}
