//! Error types for catalog_sync

use thiserror::Error;

/// Unified error type for catalog_sync operations
///
/// Per-item and per-chunk failures are absorbed into the sync report and the
/// item's `priceError` field; only whole-store write failures and invalid
/// top-level input surface through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Failed to parse a JSON document
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// HTTP error status code from the pricing service
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    /// Batch response did not match any known envelope shape
    #[error("Unexpected response shape: {0}")]
    BadResponse(String),
    /// Store file could not be written
    #[error("Store write error: {0}")]
    Io(#[from] std::io::Error),
    /// Top-level input was not a list of records
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// CSV export failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result alias for catalog_sync operations
pub type Result<T> = std::result::Result<T, Error>;
