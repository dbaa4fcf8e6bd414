//! Cache service
//!
//! The entry point a dispatch layer calls around a protected operation.
//! Reads fail open: a store error or an unreadable payload is a miss, and
//! the computation runs as if nothing was cached. Writes go through the
//! [`WritePipeline`] and never reach the caller. Nothing here changes
//! whether the protected computation succeeds.

use cachet_store::CacheStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::{Codec, Shape};
use crate::error::{CodecError, CoreError};
use crate::expiry::Expiry;
use crate::key::{KeyArg, KeyGenerator, args_to_string};
use crate::operation::{CacheDefaults, CacheableOp, EvictOp};
use crate::pipeline::WritePipeline;
use crate::registry::KeySpaceRegistry;
use crate::resolver::{KeyContext, KeyResolver, PlaceholderResolver};

/// Where and for how long one call's result is cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
    pub cache_name: String,
    pub key: String,
    pub expiry: Expiry,
}

pub struct CacheService {
    store: Arc<dyn CacheStore>,
    registry: Arc<KeySpaceRegistry>,
    pipeline: Arc<WritePipeline>,
    codec: Codec,
    keys: KeyGenerator,
    resolver: Arc<dyn KeyResolver>,
    defaults: CacheDefaults,
}

impl CacheService {
    pub fn new(registry: Arc<KeySpaceRegistry>, pipeline: Arc<WritePipeline>) -> Self {
        Self {
            store: registry.store().clone(),
            registry,
            pipeline,
            codec: Codec::default(),
            keys: KeyGenerator::default(),
            resolver: Arc::new(PlaceholderResolver),
            defaults: CacheDefaults::default(),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_defaults(mut self, defaults: CacheDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &Arc<KeySpaceRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<WritePipeline> {
        &self.pipeline
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Resolve cache name, key and expiry for one call of `op`
    ///
    /// A key template that resolves to nothing falls back to the generated
    /// key; a multi-key result uses its first key.
    pub fn resolve_target(&self, op: &CacheableOp, args: &[KeyArg]) -> CacheTarget {
        let cache_name = self
            .defaults
            .resolve_cache_name(op.cache_name.as_deref(), &op.signature);
        let key = op
            .key
            .as_deref()
            .and_then(|template| self.resolve_keys(template, &op.name, args).into_iter().next())
            .unwrap_or_else(|| self.keys.generate(&cache_name, &op.name, args));
        let expiry = self.defaults.resolve_expiry(op.expire.as_deref());

        CacheTarget {
            cache_name,
            key,
            expiry,
        }
    }

    /// Read-through: return the cached value, or compute and cache it
    ///
    /// Errors from `compute` are returned untouched; cache failures are
    /// logged and never returned.
    pub async fn cacheable<T, F, Fut, E>(
        &self,
        op: &CacheableOp,
        args: &[KeyArg],
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let target = self.resolve_target(op, args);

        if let Some(value) = self.lookup::<T>(&target.key).await {
            metrics::counter!("cachet_hits_total").increment(1);
            info!(
                operation = %op.name,
                cache = %target.cache_name,
                key = %target.key,
                args = %args_to_string(args),
                "Cache hit"
            );
            return Ok(value);
        }
        metrics::counter!("cachet_misses_total").increment(1);
        debug!("Cache miss for {}", target.key);

        let value = compute().await?;
        self.write_behind(op, args, target, &value);
        Ok(value)
    }

    /// Always compute, then cache the result
    pub async fn put<T, F, Fut, E>(
        &self,
        op: &CacheableOp,
        args: &[KeyArg],
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = compute().await?;
        let target = self.resolve_target(op, args);
        self.write_behind(op, args, target, &value);
        Ok(value)
    }

    /// Store an already computed value right away, bypassing the pipeline
    ///
    /// Unlike [`put`](Self::put) the outcome is returned: the target written,
    /// `None` for an empty value that is not cached, or the encode or store
    /// error.
    pub async fn put_now<T: Serialize + ?Sized>(
        &self,
        op: &CacheableOp,
        args: &[KeyArg],
        value: &T,
    ) -> Result<Option<CacheTarget>, CoreError> {
        let shape = Shape::of(value).map_err(|e| CodecError::Unserializable(e.to_string()))?;
        if shape.is_empty() {
            debug!("Value for {} is empty, not caching", op.name);
            return Ok(None);
        }

        let target = self.resolve_target(op, args);
        let written =
            write_entry(self.store.as_ref(), &self.registry, self.codec, &target, value).await?;
        Ok(written.then_some(target))
    }

    /// Evict what `op` names, returning how many entries were deleted
    ///
    /// Failures are logged and count as nothing evicted.
    pub async fn evict(&self, op: &EvictOp, args: &[KeyArg]) -> u64 {
        let result = if op.all_entries {
            let Some(cache_name) = self
                .defaults
                .resolve_evict_cache_name(op.cache_name.as_deref())
            else {
                warn!(
                    "Eviction {} clears all entries but names no cache, skipping",
                    op.name
                );
                return 0;
            };
            self.registry.evict_cache_name(&cache_name).await
        } else {
            let keys = op
                .key
                .as_deref()
                .map(|template| self.resolve_keys(template, &op.name, args))
                .unwrap_or_default();
            if keys.is_empty() {
                info!(
                    "Eviction {} resolved no keys for {}, nothing to do",
                    op.name,
                    args_to_string(args)
                );
                return 0;
            }
            debug!("Eviction {} resolved keys {:?}", op.name, keys);
            self.registry.evict_keys(&keys).await
        };

        match result {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("Eviction {} failed: {}", op.name, e);
                0
            }
        }
    }

    /// Decoded value stored under `key`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        match self.store.get(key).await? {
            Some(payload) => Ok(self.codec.decode(&payload)?),
            None => Ok(None),
        }
    }

    /// Stop accepting writes and wait for queued ones
    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
    }

    fn resolve_keys(&self, template: &str, operation: &str, args: &[KeyArg]) -> Vec<String> {
        self.resolver
            .resolve(template, &KeyContext { operation, args })
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = match self.store.get(key).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!("Cache read of {} failed, treating as miss: {}", key, e);
                return None;
            }
        };
        match self.codec.decode(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Cached payload under {} is unreadable, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Hand a computed value to the pipeline unless it is a null result
    fn write_behind<T>(&self, op: &CacheableOp, args: &[KeyArg], target: CacheTarget, value: &T)
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        match Shape::of(value) {
            Ok(shape) if shape.is_empty() => {
                debug!("Result of {} is empty, not caching", op.name);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Result of {} cannot be inspected, not caching: {}", op.name, e);
                return;
            }
        }

        info!(
            operation = %op.name,
            cache = %target.cache_name,
            key = %target.key,
            expiry = %target.expiry,
            args = %args_to_string(args),
            "Caching result"
        );

        let value = value.clone();
        let codec = self.codec;
        let store = self.store.clone();
        let registry = self.registry.clone();
        self.pipeline.spawn(async move {
            write_entry(store.as_ref(), &registry, codec, &target, &value).await?;
            Ok(())
        });
    }
}

/// Encode `value` and store it under `target`, returning whether anything
/// was written
async fn write_entry<T: Serialize + ?Sized>(
    store: &dyn CacheStore,
    registry: &KeySpaceRegistry,
    codec: Codec,
    target: &CacheTarget,
    value: &T,
) -> Result<bool, CoreError> {
    let payload = codec.encode(value)?;
    if payload.is_empty() {
        return Ok(false);
    }
    store
        .set(&target.key, &payload, target.expiry.ttl())
        .await?;
    registry
        .record_write(&target.key, &target.cache_name)
        .await?;
    metrics::counter!("cachet_writes_total").increment(1);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_args;
    use crate::pipeline::PipelineConfig;
    use crate::registry::RegistryConfig;
    use cachet_store::MemoryStore;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        region: String,
    }

    fn setup() -> (Arc<MemoryStore>, CacheService) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(KeySpaceRegistry::new(
            store.clone(),
            RegistryConfig::default(),
        ));
        let pipeline = Arc::new(WritePipeline::new(PipelineConfig {
            workers: 2,
            queue_capacity: 16,
        }));
        (store, CacheService::new(registry, pipeline))
    }

    async fn wait_for(store: &MemoryStore, key: &str) {
        for _ in 0..200 {
            if store.contains(key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} was never written", key);
    }

    fn find_by_id() -> CacheableOp {
        CacheableOp::new("findById", "OrderRepo::find_by_id(u64)").with_cache_name("orders")
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (store, service) = setup();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Order {
                id: 42,
                region: "eu".to_string(),
            })
        };

        let first = service
            .cacheable(&find_by_id(), &key_args![42], compute)
            .await
            .unwrap();
        wait_for(&store, "orders::findById-v1_0-42_").await;

        let second = service
            .cacheable(&find_by_id(), &key_args![42], compute)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            service
                .registry()
                .owner_of("orders::findById-v1_0-42_")
                .await
                .unwrap()
                .as_deref(),
            Some("orders")
        );
        assert_eq!(
            service.get::<Order>("orders::findById-v1_0-42_").await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_empty_results_are_not_cached() {
        let (store, service) = setup();
        let op = CacheableOp::new("list", "OrderRepo::list()").with_cache_name("orders");

        let value = service
            .cacheable(&op, &[], || async { Ok::<_, String>(Vec::<Order>::new()) })
            .await
            .unwrap();
        assert!(value.is_empty());

        let none = service
            .cacheable(&op, &key_args![1], || async { Ok::<_, String>(None::<Order>) })
            .await
            .unwrap();
        assert!(none.is_none());

        service.shutdown().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let (store, service) = setup();
        store.set_offline(true);

        let value = service
            .cacheable(&find_by_id(), &key_args![7], || async {
                Ok::<_, String>(Order {
                    id: 7,
                    region: "us".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(value.id, 7);

        // The failed write stays inside the pipeline
        service.shutdown().await;
        assert_eq!(service.evict(&EvictOp::new("clear").with_key("{0}"), &key_args![7]).await, 0);
    }

    #[tokio::test]
    async fn test_compute_errors_pass_through() {
        let (store, service) = setup();
        let result: Result<Order, String> = service
            .cacheable(&find_by_id(), &key_args![1], || async {
                Err("database down".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "database down");

        service.shutdown().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_a_miss() {
        let (store, service) = setup();
        store
            .set("orders::findById-v1_0-3_", "A{broken", None)
            .await
            .unwrap();

        let value = service
            .cacheable(&find_by_id(), &key_args![3], || async {
                Ok::<_, String>(Order {
                    id: 3,
                    region: "ap".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(value.id, 3);

        service.shutdown().await;
        let repaired = store.get("orders::findById-v1_0-3_").await.unwrap().unwrap();
        assert!(repaired.starts_with("A{"));
    }

    #[tokio::test]
    async fn test_map_results_roundtrip() {
        let (store, service) = setup();
        let op = CacheableOp::new("byRegion", "OrderRepo::by_region()").with_cache_name("regions");
        let counts = HashMap::from([("eu".to_string(), 3u32), ("us".to_string(), 5)]);

        let computed = counts.clone();
        service
            .cacheable(&op, &[], move || async move { Ok::<_, String>(computed) })
            .await
            .unwrap();
        wait_for(&store, "regions::byRegion-v1_0").await;

        let cached = service
            .cacheable(&op, &[], || async {
                Err::<HashMap<String, u32>, _>("should not run".to_string())
            })
            .await
            .unwrap();
        assert_eq!(cached, counts);
    }

    #[tokio::test]
    async fn test_key_template_and_fallbacks() {
        let (_store, service) = setup();

        let templated = CacheableOp::new("findById", "sig")
            .with_cache_name("orders")
            .with_key("order:{0}");
        assert_eq!(service.resolve_target(&templated, &key_args![5]).key, "order:5");

        // A template with nothing to refer to falls back to the generated key
        let dangling = CacheableOp::new("findById", "sig")
            .with_cache_name("orders")
            .with_key("order:{3}");
        assert_eq!(
            service.resolve_target(&dangling, &key_args![5]).key,
            "orders::findById-v1_0-5_"
        );

        let unnamed = CacheableOp::new("findById", "sig").with_expire("1H");
        let target = service.resolve_target(&unnamed, &[]);
        assert_eq!(target.cache_name, crate::key::md5_hex(b"sig"));
        assert_eq!(target.expiry, Expiry::After(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (store, service) = setup();
        let op = find_by_id().with_key("order:{0}");

        service
            .put(&op, &key_args![1], || async {
                Ok::<_, String>(Order {
                    id: 1,
                    region: "eu".to_string(),
                })
            })
            .await
            .unwrap();
        service
            .put(&op, &key_args![1], || async {
                Ok::<_, String>(Order {
                    id: 1,
                    region: "us".to_string(),
                })
            })
            .await
            .unwrap();
        service.shutdown().await;

        let cached: Order = service.get("order:1").await.unwrap().unwrap();
        assert_eq!(cached.region, "us");
        assert!(store.contains("order:1"));
    }

    #[tokio::test]
    async fn test_put_now_reports_outcome() {
        let (store, service) = setup();
        let op = find_by_id().with_key("order:{0}");
        let order = Order {
            id: 8,
            region: "eu".to_string(),
        };

        let target = service
            .put_now(&op, &key_args![8], &order)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(target.key, "order:8");
        // Written before the call returns
        assert!(store.contains("order:8"));
        assert_eq!(
            service.registry().owner_of("order:8").await.unwrap().as_deref(),
            Some("orders")
        );

        assert!(
            service
                .put_now(&op, &key_args![9], &Vec::<Order>::new())
                .await
                .unwrap()
                .is_none()
        );
        assert!(!store.contains("order:9"));

        store.set_offline(true);
        assert!(matches!(
            service.put_now(&op, &key_args![10], &order).await,
            Err(CoreError::Store(_))
        ));
        store.set_offline(false);

        let nested = vec![HashMap::from([((1, 2), "x".to_string())])];
        assert!(matches!(
            service.put_now(&op, &key_args![11], &nested).await,
            Err(CoreError::Codec(CodecError::Unserializable(_)))
        ));
        assert!(!store.contains("order:11"));
    }

    #[tokio::test]
    async fn test_evict_keys_and_all_entries() {
        let (store, service) = setup();
        for id in [1u64, 2, 3] {
            service
                .cacheable(&find_by_id(), &key_args![id], move || async move {
                    Ok::<_, String>(Order {
                        id,
                        region: "eu".to_string(),
                    })
                })
                .await
                .unwrap();
        }
        for id in [1, 2, 3] {
            wait_for(&store, &format!("orders::findById-v1_0-{}_", id)).await;
        }

        let evict_many = EvictOp::new("evictMany").with_key("{0}");
        let keys = key_args![vec!["orders::findById-v1_0-1_", "orders::findById-v1_0-2_"]];
        assert_eq!(service.evict(&evict_many, &keys).await, 2);
        assert!(!store.contains("orders::findById-v1_0-1_"));
        assert!(store.contains("orders::findById-v1_0-3_"));

        let clear = EvictOp::new("clear").with_cache_name("orders").all_entries();
        assert_eq!(service.evict(&clear, &[]).await, 1);
        assert!(!store.contains("orders::findById-v1_0-3_"));
    }

    #[tokio::test]
    async fn test_evict_without_target_is_noop() {
        let (_store, service) = setup();
        assert_eq!(service.evict(&EvictOp::new("nothing"), &key_args![1]).await, 0);
        assert_eq!(service.evict(&EvictOp::new("clear").all_entries(), &[]).await, 0);
    }
}
