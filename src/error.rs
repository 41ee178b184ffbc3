//! Error types for bac-orientation

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type used across the library
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-visible errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before a record was created
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No comparison record with this id
    #[error("Comparison not found: {0}")]
    NotFound(Uuid),

    /// Persistence failed; only the persistence step may be retried
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration file could not be read, parsed or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Program catalog could not be read
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a `ComparisonStore`
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store handle was closed
    #[error("store is closed")]
    Closed,

    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure (used by remote or test stores)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the external generator. These are always recovered into a
/// fallback analysis and never reach the caller.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator transport error: {0}")]
    Transport(String),

    /// Response did not match the analysis schema
    #[error("generator response rejected: {0}")]
    Schema(String),

    #[error("generation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}
