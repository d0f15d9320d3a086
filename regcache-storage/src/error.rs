//! Storage error types.

use regcache_types::InstanceLabel;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the Local Store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The audit chain failed verification; audited writes are blocked
    /// until an operator releases the hold.
    #[error("audit integrity hold in place since sequence {0}; operator review required")]
    Integrity(i64),

    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("instance {0} is active and cannot be used as staging")]
    ActiveInstance(InstanceLabel),

    /// Audited writes reached the active instance after a checkpoint.
    #[error("instance {instance} changed after the checkpoint ({} rows)", ids.len())]
    ActiveChanged {
        instance: InstanceLabel,
        ids: Vec<String>,
    },

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl StorageError {
    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        StorageError::Corrupt {
            table,
            detail: detail.into(),
        }
    }
}
