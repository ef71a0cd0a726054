use settle_types::ObjectKey;
use thiserror::Error;

/// Error returned by an [`ObjectStore`](crate::ObjectStore) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{key} not found")]
    NotFound { key: ObjectKey },
    #[error("{key} already exists")]
    AlreadyExists { key: ObjectKey },
    #[error("conflict on {key}: {message}")]
    Conflict { key: ObjectKey, message: String },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("store returned status {status}: {message}")]
    Status { status: u16, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Errors that may clear up on their own if the call is repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Cancelled => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
