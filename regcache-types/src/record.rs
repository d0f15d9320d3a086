use crate::ParseEnumError;
use crate::time::truncate_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local reconciliation state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local copy matches what the remote last acknowledged.
    Clean,
    /// Local write not yet pushed.
    Pending,
    /// The remote refused the local version; the next pull resolves it.
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Clean => "clean",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(SyncStatus::Clean),
            "pending" => Ok(SyncStatus::Pending),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(ParseEnumError::new("sync status", other)),
        }
    }
}

/// A cached domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub confidential: bool,
}

impl Record {
    /// Creates a record from a local write. It starts out `pending`.
    pub fn new(id: impl Into<String>, payload: serde_json::Value, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            payload,
            updated_at: truncate_millis(updated_at),
            sync_status: SyncStatus::Pending,
            confidential: false,
        }
    }

    /// Marks the record confidential. Confidential records never leave the device.
    pub fn into_confidential(mut self) -> Self {
        self.confidential = true;
        self
    }

    /// Builds a `clean` record from a remote copy.
    pub fn from_remote(remote: RemoteRecord) -> Self {
        Self {
            id: remote.id,
            payload: remote.payload,
            updated_at: truncate_millis(remote.updated_at),
            sync_status: SyncStatus::Clean,
            confidential: false,
        }
    }

    /// Wire form of this record, or `None` for confidential records.
    pub fn to_remote(&self) -> Option<RemoteRecord> {
        if self.confidential {
            return None;
        }
        Some(RemoteRecord {
            id: self.id.clone(),
            payload: self.payload.clone(),
            updated_at: self.updated_at,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.sync_status == SyncStatus::Clean
    }
}

/// Record shape exchanged with the remote backend.
///
/// Carries no confidentiality flag: only non-confidential records convert
/// into a `RemoteRecord` (see [`Record::to_remote`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl RemoteRecord {
    pub fn new(id: impl Into<String>, payload: serde_json::Value, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            payload,
            updated_at: truncate_millis(updated_at),
        }
    }
}
