use thiserror::Error;

use orion_shared::OrionError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading, writing or renaming a store file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A store file exists but does not hold the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The value was rejected before any write was attempted.
    #[error("Validation error: {0}")]
    Validation(#[from] OrionError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
