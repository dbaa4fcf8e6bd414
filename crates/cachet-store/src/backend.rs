//! Store backend trait

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::StoreError;

/// Key-value store trait
///
/// Implementations expose the string, set and hash commands the cache layer
/// needs. Every method maps onto a single atomic store command; callers must
/// not assume multi-key transactions.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete keys of any type, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Add a member to a set
    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set
    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError>;

    /// List all members of a set (empty when the set does not exist)
    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, StoreError>;

    /// Put a field into a hash
    async fn hash_put(&self, hash_key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Read a field from a hash
    async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Delete fields from a hash, returning how many existed
    async fn hash_delete(&self, hash_key: &str, fields: &[String]) -> Result<u64, StoreError>;
}

/// Convert a TTL to whole seconds for stores with second granularity.
///
/// Sub-second TTLs round up to one second so they never mean "no expiry".
pub fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}
