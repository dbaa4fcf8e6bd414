//! Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Wrong value type at {0}")]
    WrongType(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
