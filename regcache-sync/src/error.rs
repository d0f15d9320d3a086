//! Sync error types.

use regcache_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures talking to the remote backend. All of them are transient.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("remote returned HTTP {status}")]
    Status { status: u16 },

    #[error("unexpected remote response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if let Some(status) = e.status() {
            RemoteError::Status {
                status: status.as_u16(),
            }
        } else if e.is_decode() {
            RemoteError::Protocol(e.to_string())
        } else {
            RemoteError::Unreachable(e.to_string())
        }
    }
}

/// Errors that can occur during a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(#[from] RemoteError),

    /// The remote refused a record because its copy is newer. Resolved by the
    /// next pull; counted, never returned as a failure.
    #[error("conflict on record {id}")]
    Conflict { id: String },

    #[error("remote rejected record {id}: {reason}")]
    Rejected { id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Internal(format!("blocking task failed: {e}"))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Internal(format!("sync state encoding: {e}"))
    }
}
