//! Error taxonomy of the sync layer.
//!
//! - [`StorageError`]: the durable local write was rejected. A hard failure.
//! - [`RemoteError`]: a remote call failed. Mutations downgrade it to
//!   "queued for later".
//! - [`ReconciliationEntryError`]: one pending entry failed to replay. Logged
//!   and counted; never aborts the pass.

use vestry_engine::{OperationKind, RecordId, Sequence};

/// Durable local storage rejected a read or write.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing '{key}' ({needed} bytes, limit {limit})")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt stored value for '{key}': {message}")]
    Corrupt { key: String, message: String },

    #[error("failed to encode stored value: {0}")]
    Encode(String),
}

/// A call to the remote store failed.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Network(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("remote record not found: {entity_type}/{id}")]
    NotFound { entity_type: String, id: RecordId },

    #[error("remote rejected the write: {0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid remote record: {0}")]
    InvalidRecord(#[from] vestry_engine::Error),
}

impl RemoteError {
    /// Whether retrying later could succeed without anyone changing the data.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) => true,
            RemoteError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// One pending entry could not be replayed.
#[derive(Debug, thiserror::Error)]
#[error("replay of {kind} #{seq} on {entity_type}/{record_id} failed: {source}")]
pub struct ReconciliationEntryError {
    pub seq: Sequence,
    pub kind: OperationKind,
    pub entity_type: String,
    pub record_id: RecordId,
    #[source]
    pub source: RemoteError,
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to save locally: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] vestry_engine::Error),
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SyncError>;
