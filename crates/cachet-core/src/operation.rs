//! Per-operation cache metadata
//!
//! Each cached operation is described once, at registration time, by a
//! plain struct. Values are resolved with a fixed precedence: the
//! operation's own setting, then the [`CacheDefaults`] of the type that
//! owns it, then a generated fallback.

use serde::{Deserialize, Serialize};

use crate::expiry::{Expiry, parse_expiry};
use crate::key::md5_hex;

/// Type-level defaults shared by a group of operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheDefaults {
    #[serde(default)]
    pub cache_name: Option<String>,
    #[serde(default)]
    pub expire: Option<String>,
}

impl CacheDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = Some(cache_name.into());
        self
    }

    pub fn with_expire(mut self, expire: impl Into<String>) -> Self {
        self.expire = Some(expire.into());
        self
    }

    /// Cache name for an operation, falling back to a digest of its signature
    pub fn resolve_cache_name(&self, own: Option<&str>, signature: &str) -> String {
        first_set(own, self.cache_name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| md5_hex(signature.as_bytes()))
    }

    /// Cache name for an eviction, which has no generated fallback
    pub fn resolve_evict_cache_name(&self, own: Option<&str>) -> Option<String> {
        first_set(own, self.cache_name.as_deref()).map(str::to_string)
    }

    pub fn resolve_expiry(&self, own: Option<&str>) -> Expiry {
        first_set(own, self.expire.as_deref())
            .map(parse_expiry)
            .unwrap_or_default()
    }
}

/// Blank values count as unset
fn first_set<'a>(own: Option<&'a str>, default: Option<&'a str>) -> Option<&'a str> {
    own.filter(|v| !v.trim().is_empty())
        .or(default.filter(|v| !v.trim().is_empty()))
}

/// A read-through (or put) operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheableOp {
    /// Operation name, part of generated keys
    pub name: String,
    /// Full signature; its digest is the fallback cache name
    pub signature: String,
    #[serde(default)]
    pub cache_name: Option<String>,
    /// Key template; generated keys are used when unset or when it
    /// resolves to nothing
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub expire: Option<String>,
}

impl CacheableOp {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            cache_name: None,
            key: None,
            expire: None,
        }
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = Some(cache_name.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_expire(mut self, expire: impl Into<String>) -> Self {
        self.expire = Some(expire.into());
        self
    }
}

/// An eviction operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictOp {
    pub name: String,
    #[serde(default)]
    pub cache_name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// Evict the whole cache name instead of resolved keys
    #[serde(default)]
    pub all_entries: bool,
}

impl EvictOp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cache_name: None,
            key: None,
            all_entries: false,
        }
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = Some(cache_name.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn all_entries(mut self) -> Self {
        self.all_entries = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cache_name_precedence() {
        let defaults = CacheDefaults::new().with_cache_name("orders");
        assert_eq!(defaults.resolve_cache_name(Some("users"), "sig"), "users");
        assert_eq!(defaults.resolve_cache_name(None, "sig"), "orders");
        assert_eq!(defaults.resolve_cache_name(Some(""), "sig"), "orders");

        let bare = CacheDefaults::default();
        assert_eq!(
            bare.resolve_cache_name(None, "OrderRepo::find_by_id(u64)"),
            md5_hex(b"OrderRepo::find_by_id(u64)")
        );
        assert_eq!(bare.resolve_evict_cache_name(None), None);
    }

    #[test]
    fn test_expiry_precedence() {
        let defaults = CacheDefaults::new().with_expire("1H");
        assert_eq!(
            defaults.resolve_expiry(Some("30M")),
            Expiry::After(Duration::from_secs(1800))
        );
        assert_eq!(
            defaults.resolve_expiry(None),
            Expiry::After(Duration::from_secs(3600))
        );
        assert_eq!(CacheDefaults::default().resolve_expiry(None), Expiry::Never);
    }

    #[test]
    fn test_deserialize_op() {
        let op: CacheableOp = serde_json::from_str(
            r#"{"name": "findById", "signature": "find(u64)", "expire": "1D"}"#,
        )
        .unwrap();
        assert_eq!(op.name, "findById");
        assert!(op.key.is_none());

        let evict: EvictOp =
            serde_json::from_str(r#"{"name": "clear", "cache_name": "orders", "all_entries": true}"#)
                .unwrap();
        assert!(evict.all_entries);
    }
}
