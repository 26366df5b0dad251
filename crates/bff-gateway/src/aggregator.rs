//! Cache-aside profile aggregation.
//!
//! ```text
//! GET /api/profile/{id}
//!        │
//!        ▼
//!   cache lookup ──hit──▶ cached result (cached = true, no upstream calls)
//!        │ miss
//!        ▼
//!   join(user, orders)          concurrent, both awaited
//!        │
//!        ├─ user absent/failed ─▶ NotFound (nothing cached)
//!        ▼
//!   product ids from order items (deduplicated)
//!        │
//!        ├─ none ─▶ skip batch call
//!        ▼
//!   POST /products/batch        after the join, never speculative
//!        │
//!        ▼
//!   assemble ─▶ cache set (fire-and-forget) ─▶ response
//! ```

use bff_api::{AggregatedResult, ApiError, PhaseTimings, ProfileMetadata};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::metrics::GatewayMetrics;
use crate::upstream::{Upstream, UpstreamClient, UpstreamOutcome, Upstreams};

/// Detail returned to clients when the primary entity is absent.
pub const USER_NOT_FOUND: &str = "User not found";

/// The only failure that leaves the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("user {0} not found")]
    NotFound(String),
}

impl From<AggregationError> for ApiError {
    fn from(err: AggregationError) -> Self {
        match err {
            // Only the generic detail reaches the client
            AggregationError::NotFound(_) => ApiError::not_found(USER_NOT_FOUND),
        }
    }
}

pub struct ProfileAggregator {
    client: UpstreamClient,
    upstreams: Upstreams,
    cache: CacheStore,
    metrics: Arc<GatewayMetrics>,
    cache_ttl: Duration,
    key_prefix: String,
}

impl ProfileAggregator {
    pub fn new(
        client: UpstreamClient,
        upstreams: Upstreams,
        cache: CacheStore,
        metrics: Arc<GatewayMetrics>,
        cache_ttl: Duration,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            upstreams,
            cache,
            metrics,
            cache_ttl,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn upstreams(&self) -> &Upstreams {
        &self.upstreams
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    /// Cache key of the composite for `id`, e.g. `profile:user123`.
    pub fn cache_key(&self, id: &str) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    /// Glob matching every profile key.
    pub fn key_pattern(&self) -> String {
        format!("{}:*", self.key_prefix)
    }

    /// Serve the profile for `id` from cache, or aggregate and cache it.
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get_profile(&self, id: &str) -> Result<AggregatedResult, AggregationError> {
        self.metrics.record_profile_request();
        let key = self.cache_key(id);
        let backend = self.cache.backend_name();

        if let Some(cached) = self.lookup(&key).await {
            self.metrics.record_cache_hit(backend);
            debug!(key = %key, "profile served from cache");
            return Ok(cached.into_cached());
        }
        self.metrics.record_cache_miss(backend);

        let started = Instant::now();
        let result = self.aggregate(id).await;
        self.metrics.record_aggregation(started.elapsed());

        let result = result?;
        self.store(&key, &result);
        Ok(result)
    }

    async fn lookup(&self, key: &str) -> Option<AggregatedResult> {
        let bytes = self.cache.get(key).await?;
        match serde_json::from_slice::<AggregatedResult>(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cached profile, treating as miss");
                self.metrics
                    .record_cache_error(self.cache.backend_name(), "decode");
                None
            }
        }
    }

    fn store(&self, key: &str, result: &AggregatedResult) {
        match serde_json::to_vec(result) {
            Ok(bytes) => self.cache.set(key, bytes, self.cache_ttl),
            Err(e) => warn!(key = %key, error = %e, "failed to encode profile for cache"),
        }
    }

    async fn aggregate(&self, id: &str) -> Result<AggregatedResult, AggregationError> {
        let started = Instant::now();
        let encoded = urlencoding::encode(id);
        let user_path = format!("/users/{encoded}");
        let orders_path = format!("/orders/user/{encoded}");

        // Fan-out join: both branches run to completion before either is inspected
        let (user, orders) = tokio::join!(
            self.client.get(&self.upstreams.user, &user_path),
            self.client.get(&self.upstreams.order, &orders_path),
        );
        let fanout = started.elapsed();
        self.note_failure(&self.upstreams.user, &user);
        self.note_failure(&self.upstreams.order, &orders);

        let user_outcome = user.kind();
        let user = match user {
            UpstreamOutcome::Success(user) => user,
            UpstreamOutcome::EmptyOrNotFound | UpstreamOutcome::Failure(_) => {
                info!(user_id = %id, outcome = user_outcome, "primary entity absent");
                return Err(AggregationError::NotFound(id.to_string()));
            }
        };

        let orders = match orders {
            UpstreamOutcome::Success(Value::Array(orders)) => orders,
            UpstreamOutcome::Success(_) => {
                self.note_shape_error(&self.upstreams.order, "expected an array of orders");
                Vec::new()
            }
            UpstreamOutcome::EmptyOrNotFound | UpstreamOutcome::Failure(_) => Vec::new(),
        };

        let product_ids = collect_product_ids(&orders);
        let mut services_used = 2;
        let batch_started = Instant::now();
        let products = if product_ids.is_empty() {
            BTreeMap::new()
        } else {
            services_used += 1;
            self.fetch_products(&product_ids).await
        };
        let batch = if services_used > 2 {
            batch_started.elapsed()
        } else {
            Duration::ZERO
        };

        let timings = PhaseTimings {
            fanout_ms: millis(fanout),
            batch_ms: millis(batch),
            total_ms: millis(started.elapsed()),
        };

        Ok(AggregatedResult {
            metadata: ProfileMetadata {
                user_id: id.to_string(),
                orders_count: orders.len(),
                products_count: products.len(),
                aggregated_at: crate::now_rfc3339(),
                cache_ttl: self.cache_ttl.as_secs(),
                cached: false,
                services_used,
                timings,
            },
            user,
            orders,
            products,
        })
    }

    /// One batch call for every id; any failure degrades to an empty map.
    async fn fetch_products(&self, product_ids: &BTreeSet<String>) -> BTreeMap<String, Value> {
        let body = json!({ "product_ids": product_ids });
        let outcome = self
            .client
            .post_json(&self.upstreams.product, "/products/batch", &body)
            .await;
        self.note_failure(&self.upstreams.product, &outcome);

        match outcome {
            UpstreamOutcome::Success(Value::Array(products)) => index_by_id(products),
            UpstreamOutcome::Success(_) => {
                self.note_shape_error(&self.upstreams.product, "expected an array of products");
                BTreeMap::new()
            }
            UpstreamOutcome::EmptyOrNotFound | UpstreamOutcome::Failure(_) => BTreeMap::new(),
        }
    }

    fn note_failure(&self, upstream: &Upstream, outcome: &UpstreamOutcome) {
        if let Some(reason) = outcome.failure() {
            self.metrics.record_upstream_error(upstream.name, reason.label());
        }
    }

    fn note_shape_error(&self, upstream: &Upstream, detail: &str) {
        warn!(upstream = upstream.name, detail, "unexpected upstream payload shape");
        self.metrics
            .record_upstream_error(upstream.name, "malformed_payload");
    }
}

/// Unique product ids referenced by the orders' items, in sorted order.
///
/// Orders without `items` and items without a string `product_id` are
/// skipped.
pub fn collect_product_ids(orders: &[Value]) -> BTreeSet<String> {
    orders
        .iter()
        .filter_map(|order| order.get("items").and_then(Value::as_array))
        .flatten()
        .filter_map(|item| item.get("product_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Key products by their `id`; entries without one are dropped.
fn index_by_id(products: Vec<Value>) -> BTreeMap<String, Value> {
    products
        .into_iter()
        .filter_map(|product| {
            let id = product.get("id").and_then(Value::as_str)?.to_string();
            Some((id, product))
        })
        .collect()
}

fn millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 1_000_000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_ids_are_deduplicated() {
        let orders = vec![
            json!({"id": "o1", "items": [{"product_id": "A"}, {"product_id": "A"}]}),
            json!({"id": "o2", "items": [{"product_id": "B"}]}),
        ];
        let ids: Vec<_> = collect_product_ids(&orders).into_iter().collect();
        assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn product_ids_skip_malformed_items() {
        let orders = vec![
            json!({"id": "o1"}),
            json!({"id": "o2", "items": "nope"}),
            json!({"id": "o3", "items": [{"quantity": 1}, {"product_id": 7}, {"product_id": "C"}]}),
        ];
        let ids: Vec<_> = collect_product_ids(&orders).into_iter().collect();
        assert_eq!(ids, vec!["C".to_string()]);
    }

    #[test]
    fn no_orders_means_no_ids() {
        assert!(collect_product_ids(&[]).is_empty());
    }

    #[test]
    fn products_are_indexed_by_id() {
        let products = vec![
            json!({"id": "prod1", "name": "Laptop"}),
            json!({"name": "anonymous"}),
            json!({"id": "prod2", "name": "Phone"}),
        ];
        let map = index_by_id(products);
        assert_eq!(map.len(), 2);
        assert_eq!(map["prod1"]["name"], "Laptop");
        assert_eq!(map["prod2"]["name"], "Phone");
    }

    #[test]
    fn not_found_hides_the_identifier() {
        let api: ApiError = AggregationError::NotFound("user123".into()).into();
        assert_eq!(api.to_string(), USER_NOT_FOUND);
    }

    #[test]
    fn millis_rounds_to_microseconds() {
        assert_eq!(millis(Duration::from_micros(1500)), 1.5);
        assert_eq!(millis(Duration::ZERO), 0.0);
    }
}
