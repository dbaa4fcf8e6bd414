//! Cachet Core
//!
//! This crate provides the caching layer itself: key fingerprinting, the
//! payload codec, key-space bookkeeping for whole-cache eviction, the
//! asynchronous write pipeline and the reconciler that keeps bookkeeping
//! bounded.

pub mod codec;
pub mod error;
pub mod expiry;
pub mod key;
pub mod operation;
pub mod pipeline;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod service;

pub use codec::{Codec, Framing, PayloadFormat, Shape, is_byte_list};
pub use error::{CodecError, CoreError};
pub use expiry::{DEFAULT_EXPIRY, Expiry, parse_expiry};
pub use key::{DEFAULT_MAX_ARG_COUNT, KEY_SCHEMA_VERSION, KeyArg, KeyGenerator, md5_hex};
pub use operation::{CacheDefaults, CacheableOp, EvictOp};
pub use pipeline::{PipelineConfig, WriteJob, WritePipeline};
pub use reconciler::{
    DEFAULT_SCHEDULE, Reconciler, SweepStats, parse_schedule, spawn_reconciler_task,
};
pub use registry::{
    DEFAULT_MEMBER_SET_PREFIX, DEFAULT_REVERSE_INDEX_KEY, KeySpaceRegistry, RegistryConfig,
    TouchedSet,
};
pub use resolver::{KeyContext, KeyResolver, PlaceholderResolver};
pub use service::{CacheService, CacheTarget};
