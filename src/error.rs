//! Error taxonomy for the collection pipeline.
//!
//! Source errors never leave the resilience wrapper; store errors never leave
//! the snapshot cache or the hub. The worst outcome a consumer observes is a
//! `fallback`-quality snapshot.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single collector attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("source timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SourceError::InvalidResponse(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        SourceError::Unavailable(msg.into())
    }

    /// Short label used for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            SourceError::Timeout { .. } => "timeout",
            SourceError::InvalidResponse(_) => "invalid_response",
            SourceError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Unavailable(format!("http timeout: {e}"))
        } else if e.is_decode() {
            SourceError::InvalidResponse(e.to_string())
        } else {
            SourceError::Unavailable(e.to_string())
        }
    }
}

/// Failure talking to the external key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("store codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A single malformed entry rejected during merge.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{section}.{field}: {reason}")]
pub struct MergeValidationError {
    pub section: &'static str,
    pub field: &'static str,
    pub reason: String,
}

impl MergeValidationError {
    pub fn new(section: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            section,
            field,
            reason: reason.into(),
        }
    }
}

/// Pipeline-level conditions. Neither is fatal: both are logged and a snapshot is still served.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] StoreError),
    #[error("all {0} sources fell back to synthetic data")]
    AllSourcesFailed(usize),
}
