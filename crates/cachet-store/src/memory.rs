//! In-process store backend

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::backend::CacheStore;
use crate::error::StoreError;

enum Slot {
    Text {
        value: String,
        expires_at: Option<Instant>,
    },
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Slot::Text { expires_at: Some(at), .. } if *at <= now)
    }
}

/// In-process store backend
///
/// Mirrors the Redis command semantics the cache layer relies on: expiring
/// strings, sets and hashes that disappear once empty, and `WRONGTYPE`
/// errors on type mismatches. It can be switched offline to simulate an
/// unreachable server.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent command fail with [`StoreError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Whether `key` currently holds a live value of any type
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| !slot.is_expired(now))
    }

    /// Number of live keys of any type
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .lock()
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    /// Run `f` against the slot map after purging `key` if it has expired
    fn with_slots<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Slot>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|slot| slot.is_expired(Instant::now())) {
            slots.remove(key);
        }
        f(&mut slots)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_slots(key, |slots| match slots.get(key) {
            None => Ok(None),
            Some(Slot::Text { value, .. }) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.with_slots(key, |slots| {
            slots.insert(
                key.to_string(),
                Slot::Text {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let mut removed = 0;
        for key in keys {
            if let Some(slot) = slots.remove(key)
                && !slot.is_expired(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.with_slots(set_key, |slots| {
            match slots
                .entry(set_key.to_string())
                .or_insert_with(|| Slot::Set(HashSet::new()))
            {
                Slot::Set(members) => {
                    members.insert(member.to_string());
                    Ok(())
                }
                _ => Err(StoreError::WrongType(set_key.to_string())),
            }
        })
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.with_slots(set_key, |slots| {
            let now_empty = match slots.get_mut(set_key) {
                None => return Ok(()),
                Some(Slot::Set(members)) => {
                    members.remove(member);
                    members.is_empty()
                }
                Some(_) => return Err(StoreError::WrongType(set_key.to_string())),
            };
            if now_empty {
                slots.remove(set_key);
            }
            Ok(())
        })
    }

    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, StoreError> {
        self.with_slots(set_key, |slots| match slots.get(set_key) {
            None => Ok(HashSet::new()),
            Some(Slot::Set(members)) => Ok(members.clone()),
            Some(_) => Err(StoreError::WrongType(set_key.to_string())),
        })
    }

    async fn hash_put(&self, hash_key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_slots(hash_key, |slots| {
            match slots
                .entry(hash_key.to_string())
                .or_insert_with(|| Slot::Hash(HashMap::new()))
            {
                Slot::Hash(fields) => {
                    fields.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                _ => Err(StoreError::WrongType(hash_key.to_string())),
            }
        })
    }

    async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_slots(hash_key, |slots| match slots.get(hash_key) {
            None => Ok(None),
            Some(Slot::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(_) => Err(StoreError::WrongType(hash_key.to_string())),
        })
    }

    async fn hash_delete(&self, hash_key: &str, fields: &[String]) -> Result<u64, StoreError> {
        self.with_slots(hash_key, |slots| {
            let (removed, now_empty) = match slots.get_mut(hash_key) {
                None => return Ok(0),
                Some(Slot::Hash(entries)) => {
                    let removed = fields
                        .iter()
                        .filter(|field| entries.remove(field.as_str()).is_some())
                        .count() as u64;
                    (removed, entries.is_empty())
                }
                Some(_) => return Err(StoreError::WrongType(hash_key.to_string())),
            };
            if now_empty {
                slots.remove(hash_key);
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_roundtrip_and_expiry() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", Some(Duration::from_millis(20))).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("b").await.unwrap(), None);
        assert!(!store.contains("b"));
        assert!(store.contains("a"));
    }

    #[tokio::test]
    async fn test_sets_and_hashes() {
        let store = MemoryStore::new();
        store.set_add("members", "k1").await.unwrap();
        store.set_add("members", "k2").await.unwrap();
        store.set_add("members", "k1").await.unwrap();
        assert_eq!(store.set_members("members").await.unwrap().len(), 2);

        store.set_remove("members", "k1").await.unwrap();
        store.set_remove("members", "k2").await.unwrap();
        assert!(store.set_members("members").await.unwrap().is_empty());
        assert!(!store.contains("members"));

        store.hash_put("owners", "k1", "orders").await.unwrap();
        store.hash_put("owners", "k2", "users").await.unwrap();
        assert_eq!(
            store.hash_get("owners", "k1").await.unwrap().as_deref(),
            Some("orders")
        );
        let removed = store
            .hash_delete("owners", &["k1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.hash_get("owners", "k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("plain", "x", None).await.unwrap();
        assert!(matches!(
            store.set_add("plain", "m").await,
            Err(StoreError::WrongType(_))
        ));
        assert!(matches!(
            store.hash_get("plain", "f").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_counts_live_keys() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store.set_add("s", "m").await.unwrap();
        let removed = store
            .delete(&["a".to_string(), "s".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get("a").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
