//! Cache backend implementation: Redis (shared) or a local DashMap.

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::metrics::GatewayMetrics;

/// Backend label used in metrics and status endpoints.
pub const REDIS_BACKEND: &str = "redis";
/// Backend label used in metrics and status endpoints.
pub const LOCAL_BACKEND: &str = "in_memory";

/// Local writes between two full sweeps of expired entries.
pub const LOCAL_SWEEP_INTERVAL: u64 = 1024;

/// A locally cached entry with TTL support.
///
/// The data is wrapped in `Arc` so hits hand out the payload without copying.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    /// Create a new cached entry stamped with the current time.
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// An entry is unreadable from `cached_at + ttl` onwards.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis pool: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis command: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of a cache write. Never an error: the cache is an optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Stored,
    /// The write was dropped (backend fault); the request is unaffected.
    Degraded,
}

/// Per-process map of entries.
///
/// Expired entries are dropped when read, and every
/// [`LOCAL_SWEEP_INTERVAL`] writes a full sweep removes the ones nobody reads
/// again.
#[derive(Default)]
pub struct LocalCache {
    entries: DashMap<String, CachedEntry>,
    writes: AtomicU64,
}

impl LocalCache {
    fn insert(&self, key: &str, entry: CachedEntry) {
        self.entries.insert(key.to_string(), entry);
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % LOCAL_SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, "expired local entries swept");
        }
    }
}

/// The backend chosen once at startup.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local DashMap only
    Local(Arc<LocalCache>),

    /// Shared Redis with a per-operation deadline
    Redis { redis: Pool, op_timeout: Duration },
}

/// Occupancy of the cache backend, as reported by `/api/cache/stats`.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub backend: &'static str,
    /// `None` when the backend could not be queried.
    pub entries: Option<usize>,
    /// Live keys, local backend only.
    pub keys: Option<Vec<String>>,
}

/// Key/value store with per-key expiry, shared by all request tasks.
///
/// Every fault of the Redis backend is logged, counted and absorbed here:
/// `get` degrades to a miss and `put` to [`CacheWrite::Degraded`].
#[derive(Clone)]
pub struct CacheStore {
    backend: CacheBackend,
    metrics: Arc<GatewayMetrics>,
}

impl CacheStore {
    pub fn new(backend: CacheBackend, metrics: Arc<GatewayMetrics>) -> Self {
        Self { backend, metrics }
    }

    /// Create a store over a fresh local map.
    pub fn new_local(metrics: Arc<GatewayMetrics>) -> Self {
        Self::new(CacheBackend::Local(Arc::new(LocalCache::default())), metrics)
    }

    /// Create a store over a Redis pool.
    pub fn new_redis(redis: Pool, op_timeout: Duration, metrics: Arc<GatewayMetrics>) -> Self {
        Self::new(CacheBackend::Redis { redis, op_timeout }, metrics)
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            CacheBackend::Local(_) => LOCAL_BACKEND,
            CacheBackend::Redis { .. } => REDIS_BACKEND,
        }
    }

    /// Get a live value. Expired entries and backend faults read as `None`.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        match &self.backend {
            CacheBackend::Local(local) => {
                if let Some(entry) = local.entries.get(key) {
                    if !entry.is_expired() {
                        return Some(Arc::clone(&entry.data));
                    }
                    // Remove expired entry
                    drop(entry);
                    local.entries.remove_if(key, |_, e| e.is_expired());
                    tracing::debug!(key = %key, "expired local entry evicted");
                }
                None
            }
            CacheBackend::Redis { redis, op_timeout } => {
                let result = with_deadline(*op_timeout, async {
                    let mut conn = redis.get().await?;
                    let data: Option<Vec<u8>> = conn.get(key).await?;
                    Ok::<_, CacheError>(data)
                })
                .await;

                match result {
                    Ok(data) => data.map(Arc::new),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Redis GET failed, treating as miss");
                        self.metrics.record_cache_error(REDIS_BACKEND, "get");
                        None
                    }
                }
            }
        }
    }

    /// Store a value with TTL, overwriting any previous value for `key`.
    pub async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheWrite {
        match &self.backend {
            CacheBackend::Local(local) => {
                local.insert(key, CachedEntry::new(value, ttl));
                CacheWrite::Stored
            }
            CacheBackend::Redis { redis, op_timeout } => {
                // SETEX rejects 0; sub-second TTLs round up
                let ttl_secs = ttl.as_secs().max(1);
                let result = with_deadline(*op_timeout, async {
                    let mut conn = redis.get().await?;
                    conn.set_ex::<_, _, ()>(key, value.as_slice(), ttl_secs)
                        .await?;
                    Ok::<_, CacheError>(())
                })
                .await;

                match result {
                    Ok(()) => {
                        tracing::debug!(key = %key, ttl_secs, "cache set (redis)");
                        CacheWrite::Stored
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Redis SET failed, write dropped");
                        self.metrics.record_cache_error(REDIS_BACKEND, "put");
                        CacheWrite::Degraded
                    }
                }
            }
        }
    }

    /// Fire-and-forget write.
    ///
    /// The local map is updated before returning; Redis writes run on a
    /// spawned task so the caller never waits on the network.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        match &self.backend {
            CacheBackend::Local(local) => {
                local.insert(key, CachedEntry::new(value, ttl));
            }
            CacheBackend::Redis { .. } => {
                let store = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    store.put(&key, value, ttl).await;
                });
            }
        }
    }

    /// Count live entries. `pattern` is a Redis glob such as `profile:*`.
    pub async fn stats(&self, pattern: &str) -> CacheStats {
        match &self.backend {
            CacheBackend::Local(local) => {
                local.purge_expired();
                // Only trailing-`*` globs are meaningful for the local map
                let prefix = pattern.trim_end_matches('*');
                let mut keys: Vec<String> = local
                    .entries
                    .iter()
                    .filter(|e| e.key().starts_with(prefix))
                    .map(|e| e.key().clone())
                    .collect();
                keys.sort();
                CacheStats {
                    backend: LOCAL_BACKEND,
                    entries: Some(keys.len()),
                    keys: Some(keys),
                }
            }
            CacheBackend::Redis { redis, op_timeout } => {
                let result = with_deadline(*op_timeout, async {
                    let mut conn = redis.get().await?;
                    let keys: Vec<String> = conn.keys(pattern).await?;
                    Ok::<_, CacheError>(keys.len())
                })
                .await;

                let entries = match result {
                    Ok(count) => Some(count),
                    Err(e) => {
                        tracing::warn!(error = %e, "Redis KEYS failed");
                        self.metrics.record_cache_error(REDIS_BACKEND, "stats");
                        None
                    }
                };
                CacheStats {
                    backend: REDIS_BACKEND,
                    entries,
                    keys: None,
                }
            }
        }
    }

    /// Check if the backend is reachable (for health checks).
    pub async fn is_available(&self) -> bool {
        match &self.backend {
            CacheBackend::Local(_) => true,
            CacheBackend::Redis { redis, op_timeout } => {
                with_deadline(*op_timeout, async { Ok::<_, CacheError>(redis.get().await?) })
                    .await
                    .is_ok()
            }
        }
    }
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout(deadline)),
    }
}
