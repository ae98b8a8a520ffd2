//! Error types for dsrc-enrich
//!
//! Per-site and per-IP problems are reported through `LookupFailure` and the
//! run summary; `EnrichError` is reserved for failures that stop an operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    /// dsrc-common error (database, io, config)
    #[error(transparent)]
    Common(#[from] dsrc_common::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Vendor API answered with a non-retryable status, or retries ran out
    #[error("Meraki API error {status}: {message}")]
    Meraki { status: u16, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EnrichError {
    /// Vendor outage or network trouble, as opposed to a rejected request
    pub fn is_transient_vendor_error(&self) -> bool {
        match self {
            EnrichError::Meraki { status, .. } => *status == 429 || *status >= 500,
            EnrichError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for EnrichError {
    fn from(err: sqlx::Error) -> Self {
        EnrichError::Common(dsrc_common::Error::Database(err))
    }
}

impl From<std::io::Error> for EnrichError {
    fn from(err: std::io::Error) -> Self {
        EnrichError::Common(dsrc_common::Error::Io(err))
    }
}

/// Result type for enrichment operations
pub type EnrichResult<T> = Result<T, EnrichError>;
