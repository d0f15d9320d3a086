//! Persisted sync state.

use crate::error::{RemoteError, SyncError};
use chrono::{DateTime, Utc};
use regcache_storage::LocalStore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub(crate) const META_SYNC_STATE: &str = "sync_state";

/// Lifecycle status of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    Offline,
}

/// Coarse category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncErrorKind {
    Network,
    Rejected,
    Storage,
    Interrupted,
    Internal,
}

/// A user-facing error record. The message never carries raw internal detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorEntry {
    pub at: DateTime<Utc>,
    pub kind: SyncErrorKind,
    pub message: String,
}

impl SyncErrorEntry {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            at: regcache_types::time::now(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn interrupted() -> Self {
        Self::new(
            SyncErrorKind::Interrupted,
            "previous sync was interrupted before it finished",
        )
    }
}

impl From<&SyncError> for SyncErrorEntry {
    fn from(e: &SyncError) -> Self {
        match e {
            SyncError::Network(RemoteError::Timeout) => {
                Self::new(SyncErrorKind::Network, "remote did not respond in time")
            }
            SyncError::Network(RemoteError::Status { status }) => {
                Self::new(SyncErrorKind::Network, format!("remote returned HTTP {status}"))
            }
            SyncError::Network(RemoteError::Protocol(_)) => {
                Self::new(SyncErrorKind::Network, "unexpected remote response")
            }
            SyncError::Network(_) => Self::new(SyncErrorKind::Network, "remote unreachable"),
            SyncError::Rejected { id, reason } => Self::new(
                SyncErrorKind::Rejected,
                format!("record {id} rejected: {reason}"),
            ),
            SyncError::Conflict { id } => Self::new(
                SyncErrorKind::Rejected,
                format!("record {id} conflicted with a newer remote version"),
            ),
            SyncError::Storage(_) => Self::new(SyncErrorKind::Storage, "local storage failure"),
            SyncError::Internal(_) => Self::new(SyncErrorKind::Internal, "internal sync failure"),
        }
    }
}

/// Singleton sync state, stored as JSON under `meta.sync_state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Pull cutoff of the last completed pull phase.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub status: EngineStatus,
    pub pending_push_count: u64,
    /// Most recent errors, oldest first.
    pub error_history: VecDeque<SyncErrorEntry>,
}

impl SyncState {
    pub const ERROR_HISTORY_LIMIT: usize = 5;

    pub fn record_error(&mut self, entry: SyncErrorEntry) {
        self.error_history.push_back(entry);
        while self.error_history.len() > Self::ERROR_HISTORY_LIMIT {
            self.error_history.pop_front();
        }
    }

    pub(crate) fn load(store: &LocalStore) -> Result<Self, SyncError> {
        match store.get_meta(META_SYNC_STATE)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Self::default()),
        }
    }

    pub(crate) fn persist(&self, store: &LocalStore) -> Result<(), SyncError> {
        store.put_meta(META_SYNC_STATE, &serde_json::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_history_keeps_last_five() {
        let mut state = SyncState::default();
        for i in 0..8 {
            state.record_error(SyncErrorEntry::new(SyncErrorKind::Network, format!("e{i}")));
        }
        let messages: Vec<&str> = state
            .error_history
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(messages, vec!["e3", "e4", "e5", "e6", "e7"]);
    }

    #[test]
    fn storage_errors_are_sanitized() {
        let err = SyncError::Storage(regcache_storage::StorageError::LockPoisoned("x"));
        let entry = SyncErrorEntry::from(&err);
        assert_eq!(entry.kind, SyncErrorKind::Storage);
        assert_eq!(entry.message, "local storage failure");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EngineStatus::Offline).unwrap(),
            "\"offline\""
        );
    }
}
