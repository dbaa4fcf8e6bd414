//! Cachet Store Layer
//!
//! This crate provides the key-value store abstraction used by Cachet,
//! with a Redis backend and an in-process backend for tests and local runs.

pub mod backend;
pub mod error;
pub mod memory;
pub mod redis_store;

pub use backend::CacheStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
