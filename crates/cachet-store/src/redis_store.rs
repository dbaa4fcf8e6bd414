//! Redis store backend

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{CacheStore, ttl_seconds};
use crate::error::StoreError;

/// Redis store backend
///
/// Wraps a multiplexed [`ConnectionManager`], which reconnects on its own after
/// transient failures. The manager is cheap to clone, so every call works on
/// its own handle.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Configuration(format!("Invalid Redis URL {}: {}", url, e)))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!("Connected to Redis at {}", redact_url(url));
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.conn().get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let seconds = ttl_seconds(ttl);
                debug!("SETEX {} ({}s)", key, seconds);
                conn.set_ex::<_, _, ()>(key, value, seconds).await?;
            }
            None => {
                debug!("SET {}", key);
                conn.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.conn().del(keys).await?;
        Ok(removed)
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.conn().sadd::<_, _, ()>(set_key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.conn().srem::<_, _, ()>(set_key, member).await?;
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, StoreError> {
        let members: HashSet<String> = self.conn().smembers(set_key).await?;
        Ok(members)
    }

    async fn hash_put(&self, hash_key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.conn().hset::<_, _, _, ()>(hash_key, field, value).await?;
        Ok(())
    }

    async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.conn().hget(hash_key, field).await?;
        Ok(value)
    }

    async fn hash_delete(&self, hash_key: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.conn().hdel(hash_key, fields).await?;
        Ok(removed)
    }
}

/// Strip credentials from a connection URL before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
