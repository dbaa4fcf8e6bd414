//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] cachet_store::StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Write pipeline is shut down")]
    PipelineClosed,
}

/// Failures while turning values into payloads and back
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Value cannot be serialized: {0}")]
    Unserializable(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}
