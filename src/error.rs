//! Unified error types for the reconciliation engine
//!
//! Errors fall into two families:
//! - validation errors raised before any remote call (fatal, no partial plan)
//! - provider errors raised by an adapter, already classified as transient
//!   (retryable) or permanent (not retryable) before they leave the adapter

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for planning and execution
///
/// All variants are serializable so reports can carry them verbatim.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum SyncError {
    /// Malformed or ambiguous desired state. Aborts before any remote call.
    #[error("Invalid desired state: {0}")]
    Validation(String),

    /// Rate limits, 5xx responses, timeouts. Retried with bounded backoff.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Auth or request validation failures. Never retried.
    #[error("Permanent provider error: {0}")]
    Permanent(String),

    /// The remote already holds an entity with this identity.
    ///
    /// Raised by adapters on duplicate-create signals (HTTP 409, Gmail's
    /// "Label name exists or conflicts"). The executor uses this to retry a
    /// failed create as an update against the existing entity.
    #[error("Entity already exists on remote: {0}")]
    AlreadyExists(String),

    /// A snapshot listing failed while computing a diff. Fatal to the run
    /// and reported distinctly from apply-time operation failures.
    #[error("Failed to list remote state: {0}")]
    Snapshot(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl SyncError {
    /// Whether the executor may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Connect errors and timeouts are worth retrying; anything that got
        // far enough to carry a status code is classified by the adapter.
        if err.is_timeout() || err.is_connect() {
            SyncError::Transient(err.to_string())
        } else {
            SyncError::Permanent(err.to_string())
        }
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Classify an HTTP status code the way both adapters do.
///
/// 429 and 5xx are transient; every other client error is permanent. 409 is
/// surfaced as [`SyncError::AlreadyExists`] so the executor can self-heal.
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> SyncError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SyncError::Transient(format!("{status}: {body}"))
    } else if status == reqwest::StatusCode::CONFLICT {
        SyncError::AlreadyExists(body.to_string())
    } else {
        SyncError::Permanent(format!("{status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "upstream").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "bad body").is_transient());
        assert_eq!(
            classify_status(StatusCode::CONFLICT, "dupe"),
            SyncError::AlreadyExists("dupe".into())
        );
    }
}
