// Path: crates/storage/src/error.rs
use ferry_types::error::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the local index.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An error from the redb backend, passed through verbatim.
    #[error("Storage backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
    /// A value could not be encoded for storage.
    #[error("Encode error: {0}")]
    Encode(String),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
            Self::Encode(_) => "STORAGE_ENCODE_ERROR",
        }
    }
}

pub(crate) fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    let err = StorageError::Backend(e.to_string());
    ferry_telemetry::error_metrics().inc_error("storage", err.code());
    err
}
