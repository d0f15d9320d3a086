use regcache_storage::StorageError;
use regcache_sync::RemoteError;
use std::path::PathBuf;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("file cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every tier missed or was stale, and the remote could not be reached.
    #[error("{key} is not cached and the remote is unavailable: {source}")]
    Unavailable {
        key: String,
        #[source]
        source: RemoteError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::Internal(format!("blocking task failed: {e}"))
    }
}
