use regcache_crypto::CryptoError;
use regcache_storage::StorageError;
use regcache_update::UpdateError;
use std::path::PathBuf;
use thiserror::Error;

pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup snapshot not found: {0}")]
    NotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup blob {id} is corrupt: {detail}")]
    Corrupt { id: String, detail: String },

    #[error("backup blob {id} does not match its recorded content hash")]
    HashMismatch { id: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("restore failed: {0}")]
    Restore(#[from] UpdateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BackupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(id: &str, detail: impl Into<String>) -> Self {
        BackupError::Corrupt {
            id: id.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackupError::Internal(format!("blocking task failed: {e}"))
    }
}
