//! The narrow contract the engine needs from the remote backend.

use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regcache_types::RemoteRecord;
use serde::{Deserialize, Serialize};

/// One page of remote changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changed records in ascending `updated_at` order.
    pub records: Vec<RemoteRecord>,
    /// Every change at or before this instant has been delivered.
    /// `None` when nothing changed.
    pub cutoff: Option<DateTime<Utc>>,
    pub has_more: bool,
}

/// Why the remote refused a pushed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum RejectReason {
    /// The remote holds a newer version.
    Conflict,
    /// The record failed remote validation.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub id: String,
    pub reason: RejectReason,
}

/// Per-record result of a batch upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertAck {
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejection>,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Records with `updated_at > since` (all records when `since` is `None`).
    ///
    /// A page may exceed `limit` so that records sharing the cutoff timestamp
    /// are never split across pages.
    async fn list_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ChangeSet, RemoteError>;

    async fn batch_upsert(&self, records: &[RemoteRecord]) -> Result<UpsertAck, RemoteError>;

    async fn fetch_record(&self, id: &str) -> Result<Option<RemoteRecord>, RemoteError>;
}
