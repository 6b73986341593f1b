//! Host layer error types
//!
//! All errors a [`VersionControlHost`](crate::host::VersionControlHost) can
//! report are defined here. We use `thiserror` for ergonomic error definition
//! and better error messages

use std::time::Duration;

use thiserror::Error;

/// the main error type for host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// transport-level HTTP failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// the requested object or path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// a single-file write carried a prior hash that no longer matches
    #[error("stale content: {path} was changed since it was read")]
    StaleContent { path: String },

    /// branch update rejected because the branch moved since it was read
    #[error("update of branch {branch} is not a fast forward")]
    NotFastForward { branch: String },

    /// the host asked us to slow down
    #[error("rate limited by host (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// any other non-success response
    #[error("host returned {status}: {message}")]
    Status { status: u16, message: String },

    /// a payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a request URL could not be built
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            HostError::NotFound(_) => true,
            HostError::Git(e) => e.code() == git2::ErrorCode::NotFound,
            _ => false,
        }
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            HostError::StaleContent { .. } | HostError::NotFastForward { .. }
        )
    }

    /// check if this error is recoverable by re-running a read-modify-write
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            HostError::NotFastForward { .. } | HostError::RateLimited { .. }
        )
    }
}

/// result type alias for host operations
pub type HostResult<T> = Result<T, HostError>;
