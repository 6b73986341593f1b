//! Content store error types

use thiserror::Error;

use crate::host::{HostError, InvalidNameError, Provider};
use crate::store::validate::ValidationError;

/// the main error type for content store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// failure reported by the repository host
    #[error(transparent)]
    Host(#[from] HostError),

    /// a write precondition needed a file that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// optimistic lock failure: the file changed since the caller read it
    #[error("conflict on {path}: expected {expected}, found {actual}")]
    Conflict {
        path: String,
        expected: String,
        actual: String,
    },

    /// upload refused by validation
    #[error("invalid upload: {0}")]
    InvalidUpload(ValidationError),

    /// path or branch name rejected
    #[error(transparent)]
    InvalidPath(#[from] InvalidNameError),

    /// a batch needs at least one file
    #[error("batch contains no files")]
    EmptyBatch,

    /// the identity could not be resolved to a repository
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// the identity belongs to a different provider than the store's host
    #[error("identity is for {actual} but the store is backed by {expected}")]
    ProviderMismatch { expected: Provider, actual: Provider },

    /// stored bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Host(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// optimistic lock failures and exhausted branch races
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Host(e) => e.is_conflict(),
            _ => false,
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::InvalidUpload(e)
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
