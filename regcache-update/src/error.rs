//! Update coordinator error types.

use crate::coordinator::Phase;
use regcache_storage::StorageError;
use thiserror::Error;

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

#[derive(Debug, Error)]
pub enum BulkSourceError {
    #[error("bulk source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid bulk snapshot: {0}")]
    Invalid(String),
}

/// Staging failed its pre-cutover checks. The refresh has been aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("row count mismatch: expected {expected}, staged {actual}")]
    RowCount { expected: u64, actual: u64 },

    #[error("record {id} listed in the manifest is missing from staging")]
    MissingRow { id: String },

    #[error("record {id} does not match its manifest digest")]
    DigestMismatch { id: String },
}

/// Cutover was refused or undone. Never partially applied.
#[derive(Debug, Error)]
pub enum CutoverError {
    /// The active instance took audited writes after carry-forward.
    #[error("active instance changed since staging was loaded ({} rows)", ids.len())]
    ActiveDiverged { ids: Vec<String> },

    #[error("could not switch active instance: {0}")]
    Switch(#[source] StorageError),

    #[error("post-cutover health check failed: {reason} (rolled back: {rolled_back})")]
    HealthCheckFailed { reason: String, rolled_back: bool },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{operation} is not valid while {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("cutover failed: {0}")]
    Cutover(#[from] CutoverError),

    #[error(transparent)]
    Source(#[from] BulkSourceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("no previous cutover to roll back")]
    NothingToRollBack,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(e: tokio::task::JoinError) -> Self {
        UpdateError::Internal(format!("blocking task failed: {e}"))
    }
}
