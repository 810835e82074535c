use std::time::Duration;

use crate::request::DeleteRequestStatus;

/// Failure reported by an implementation of the indexed key/value contract.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Index backend error: {0}")]
    Backend(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the delete request store and the tombstones loader.
#[derive(Debug, thiserror::Error)]
pub enum DeletesError {
    /// The underlying store failed; propagated unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored key or value does not have the expected shape.
    #[error("Invalid delete request record: {0}")]
    Encoding(String),

    #[error("Invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("Delete request {user_id}:{request_id} not found")]
    NotFound {
        user_id: String,
        request_id: String,
    },

    #[error("Illegal status transition from {from} to {to}")]
    InvalidTransition {
        from: DeleteRequestStatus,
        to: DeleteRequestStatus,
    },
}

impl DeletesError {
    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DeletesError>;
