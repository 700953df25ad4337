// src/core/error.rs

use thiserror::Error;

use crate::core::models::JobId;

/// Result alias used by every scan driver.
pub type ScanResult<T> = Result<T, ScanError>;

/// Failures that abort a whole driver run.
///
/// Per-target problems (refused connections, timeouts, NXDOMAIN, flaky
/// providers) never surface here: drivers swallow them at the target
/// boundary. Anything that does reach this type is translated by the job
/// body into a `failed` job.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid base URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid resolver address `{0}`")]
    InvalidResolver(String),

    #[error("invalid scan parameters: {0}")]
    InvalidParams(String),

    #[error("admission gate closed while {0} targets were pending")]
    GateClosed(usize),

    #[error("scan driver panicked: {0}")]
    Panicked(String),
}

/// Errors raised by a [`JobStore`](crate::core::store::JobStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("failed to encode finding payload: {0}")]
    Encode(#[from] serde_json::Error),
}
