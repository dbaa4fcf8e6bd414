//! Key-space registry
//!
//! The store has no "delete by prefix", so every written key is recorded in
//! two places: the member set of its cache name (`<prefix><cache name>`) and
//! one process-wide reverse-index hash mapping key to cache name. Evicting a
//! whole cache name walks its member set; evicting single keys uses the
//! reverse index to keep member sets tidy.

use cachet_store::CacheStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoreError;

/// Default prefix of member-set addresses
pub const DEFAULT_MEMBER_SET_PREFIX: &str = "REDIS_CACHE_KEYS_OF_";

/// Default address of the reverse-index hash
pub const DEFAULT_REVERSE_INDEX_KEY: &str = "C7264226X_CACHE_NAME_OF_KEY_HASH";

/// Store addresses used for registry bookkeeping
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub member_set_prefix: String,
    pub reverse_index_key: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            member_set_prefix: DEFAULT_MEMBER_SET_PREFIX.to_string(),
            reverse_index_key: DEFAULT_REVERSE_INDEX_KEY.to_string(),
        }
    }
}

/// Member-set addresses written since the last reconciliation sweep
///
/// Purely local and safe to lose: the next write to a cache name records
/// its address again.
#[derive(Debug, Default)]
pub struct TouchedSet {
    addresses: Mutex<HashSet<String>>,
}

impl TouchedSet {
    pub fn insert(&self, address: &str) {
        let mut addresses = self.addresses.lock();
        if !addresses.contains(address) {
            addresses.insert(address.to_string());
        }
    }

    /// Atomically swap the set for an empty one, returning what it held
    pub fn take(&self) -> HashSet<String> {
        std::mem::take(&mut *self.addresses.lock())
    }

    pub fn len(&self) -> usize {
        self.addresses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.lock().is_empty()
    }
}

/// Registry of which keys belong to which cache name
pub struct KeySpaceRegistry {
    store: Arc<dyn CacheStore>,
    config: RegistryConfig,
    touched: TouchedSet,
}

impl KeySpaceRegistry {
    pub fn new(store: Arc<dyn CacheStore>, config: RegistryConfig) -> Self {
        debug!(
            "Initializing key-space registry (member sets: {}*, reverse index: {})",
            config.member_set_prefix, config.reverse_index_key
        );

        Self {
            store,
            config,
            touched: TouchedSet::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Store address of the member set for `cache_name`
    pub fn member_set_address(&self, cache_name: &str) -> String {
        format!("{}{}", self.config.member_set_prefix, cache_name)
    }

    /// Addresses touched since the last sweep
    pub fn touched(&self) -> &TouchedSet {
        &self.touched
    }

    /// Record that `key` now holds a value belonging to `cache_name`
    ///
    /// A key moving to another cache name leaves its previous member set.
    pub async fn record_write(&self, key: &str, cache_name: &str) -> Result<(), CoreError> {
        let address = self.member_set_address(cache_name);
        if let Some(previous) = self.owner_of(key).await?
            && previous != cache_name
        {
            debug!("Key {} moves from cache {} to {}", key, previous, cache_name);
            self.store
                .set_remove(&self.member_set_address(&previous), key)
                .await?;
        }
        self.store.set_add(&address, key).await?;
        self.store
            .hash_put(&self.config.reverse_index_key, key, cache_name)
            .await?;
        self.touched.insert(&address);
        Ok(())
    }

    /// Cache name that owns `key`, if recorded
    pub async fn owner_of(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .store
            .hash_get(&self.config.reverse_index_key, key)
            .await?)
    }

    /// Keys currently recorded under `cache_name`
    pub async fn members(&self, cache_name: &str) -> Result<HashSet<String>, CoreError> {
        Ok(self
            .store
            .set_members(&self.member_set_address(cache_name))
            .await?)
    }

    /// Evict individual keys, returning how many entries were deleted
    pub async fn evict_keys(&self, keys: &[String]) -> Result<u64, CoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        for key in keys {
            deleted += self.store.delete(std::slice::from_ref(key)).await?;
            match self.owner_of(key).await? {
                Some(cache_name) => {
                    let address = self.member_set_address(&cache_name);
                    self.store.set_remove(&address, key).await?;
                }
                None => debug!("Key {} has no recorded cache name", key),
            }
        }
        self.store
            .hash_delete(&self.config.reverse_index_key, keys)
            .await?;

        metrics::counter!("cachet_evicted_keys_total").increment(deleted);
        debug!("Evicted {} of {} keys", deleted, keys.len());
        Ok(deleted)
    }

    /// Evict every key recorded under `cache_name`, returning how many
    /// entries were deleted
    pub async fn evict_cache_name(&self, cache_name: &str) -> Result<u64, CoreError> {
        let address = self.member_set_address(cache_name);
        let members = self.store.set_members(&address).await?;
        if members.is_empty() {
            info!("Cache {} has no recorded keys, nothing evicted", cache_name);
            return Ok(0);
        }

        let keys: Vec<String> = members.into_iter().collect();
        let deleted = self.store.delete(&keys).await?;
        self.store.delete(std::slice::from_ref(&address)).await?;
        self.store
            .hash_delete(&self.config.reverse_index_key, &keys)
            .await?;

        metrics::counter!("cachet_evicted_keys_total").increment(deleted);
        info!(
            "Evicted cache {} ({} keys recorded, {} entries deleted)",
            cache_name,
            keys.len(),
            deleted
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, KeySpaceRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = KeySpaceRegistry::new(store.clone(), RegistryConfig::default());
        (store, registry)
    }

    async fn write(store: &MemoryStore, registry: &KeySpaceRegistry, key: &str, cache: &str) {
        store.set(key, "payload", None).await.unwrap();
        registry.record_write(key, cache).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_write() {
        let (store, registry) = setup();
        write(&store, &registry, "orders::findById-v1_0-1_", "orders").await;

        assert_eq!(
            registry.owner_of("orders::findById-v1_0-1_").await.unwrap().as_deref(),
            Some("orders")
        );
        assert!(
            store
                .set_members("REDIS_CACHE_KEYS_OF_orders")
                .await
                .unwrap()
                .contains("orders::findById-v1_0-1_")
        );
        assert!(registry.touched().take().contains("REDIS_CACHE_KEYS_OF_orders"));
        assert!(registry.touched().is_empty());
    }

    #[tokio::test]
    async fn test_evict_cache_name() {
        let (store, registry) = setup();
        write(&store, &registry, "o1", "orders").await;
        write(&store, &registry, "o2", "orders").await;
        write(&store, &registry, "u1", "users").await;

        assert_eq!(registry.evict_cache_name("orders").await.unwrap(), 2);

        assert_eq!(store.get("o1").await.unwrap(), None);
        assert_eq!(store.get("o2").await.unwrap(), None);
        assert!(store.get("u1").await.unwrap().is_some());
        assert!(!store.contains("REDIS_CACHE_KEYS_OF_orders"));
        assert_eq!(registry.owner_of("o1").await.unwrap(), None);
        assert_eq!(registry.owner_of("u1").await.unwrap().as_deref(), Some("users"));
    }

    #[tokio::test]
    async fn test_evict_unknown_cache_name_is_noop() {
        let (store, registry) = setup();
        write(&store, &registry, "u1", "users").await;
        assert_eq!(registry.evict_cache_name("orders").await.unwrap(), 0);
        assert!(store.contains("u1"));
    }

    #[tokio::test]
    async fn test_evict_keys_updates_member_set() {
        let (store, registry) = setup();
        write(&store, &registry, "o1", "orders").await;
        write(&store, &registry, "o2", "orders").await;

        let deleted = registry
            .evict_keys(&["o1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.get("o1").await.unwrap(), None);
        assert_eq!(registry.owner_of("o1").await.unwrap(), None);

        let members = registry.members("orders").await.unwrap();
        assert_eq!(members, HashSet::from(["o2".to_string()]));

        // A later whole-cache eviction only sees what is left
        assert_eq!(registry.evict_cache_name("orders").await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_moves_ownership() {
        let (store, registry) = setup();
        write(&store, &registry, "k", "first").await;
        write(&store, &registry, "k", "second").await;
        assert_eq!(registry.owner_of("k").await.unwrap().as_deref(), Some("second"));
        assert!(registry.members("first").await.unwrap().is_empty());

        registry.evict_keys(&["k".to_string()]).await.unwrap();
        assert!(registry.members("second").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_surface() {
        let (store, registry) = setup();
        store.set_offline(true);
        assert!(matches!(
            registry.record_write("k", "c").await,
            Err(CoreError::Store(_))
        ));
        assert!(matches!(
            registry.evict_cache_name("c").await,
            Err(CoreError::Store(_))
        ));
        assert!(registry.touched().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_touched_set_take_loses_nothing() {
        let touched = Arc::new(TouchedSet::default());
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let touched = touched.clone();
                tokio::spawn(async move {
                    for i in 0..500 {
                        touched.insert(&format!("set-{}-{}", w, i));
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut takes = 0;
        while !writers.iter().all(|w| w.is_finished()) {
            let batch = touched.take();
            // Each address lands in exactly one batch
            assert!(batch.is_disjoint(&seen));
            seen.extend(batch);
            takes += 1;
            tokio::task::yield_now().await;
        }
        for writer in writers {
            writer.await.unwrap();
        }
        seen.extend(touched.take());

        assert!(takes > 0);
        assert_eq!(seen.len(), 8 * 500);
        assert!(touched.is_empty());
    }

    #[test]
    fn test_custom_addresses() {
        let registry = KeySpaceRegistry::new(
            Arc::new(MemoryStore::new()),
            RegistryConfig {
                member_set_prefix: "keys:".to_string(),
                reverse_index_key: "owners".to_string(),
            },
        );
        assert_eq!(registry.member_set_address("orders"), "keys:orders");
    }
}
