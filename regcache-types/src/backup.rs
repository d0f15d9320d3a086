use crate::InstanceLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of an encrypted backup snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// The snapshot may not be destroyed before this instant.
    pub retention_until: DateTime<Utc>,
    /// Location of the encrypted blob.
    pub encrypted_blob_ref: String,
    pub source_instance: InstanceLabel,
    pub row_count: i64,
    /// Hex SHA-256 of the plaintext blob.
    pub content_hash: String,
}

impl BackupSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.retention_until
    }
}
