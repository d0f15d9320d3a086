use crate::ParseEnumError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation recorded in the audit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEventType {
    Insert,
    Update,
    Delete,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Insert => "insert",
            AuditEventType::Update => "update",
            AuditEventType::Delete => "delete",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(AuditEventType::Insert),
            "update" => Ok(AuditEventType::Update),
            "delete" => Ok(AuditEventType::Delete),
            other => Err(ParseEnumError::new("audit event type", other)),
        }
    }
}

/// One immutable link of the audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the ledger, starting at 1 with no gaps.
    pub sequence_number: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub event_type: AuditEventType,
    pub table_name: String,
    pub record_id: String,
    /// New value of the row; `None` for deletes.
    pub payload: Option<serde_json::Value>,
    /// Hex SHA-256 over the previous checksum, this entry's canonical form and the ledger secret.
    pub checksum: String,
}

impl AuditEntry {
    /// The JSON document whose canonical bytes feed the checksum.
    pub fn canonical_document(&self) -> serde_json::Value {
        serde_json::json!({
            "sequence_number": self.sequence_number,
            "timestamp": self.timestamp.timestamp_millis(),
            "actor": self.actor,
            "event_type": self.event_type.as_str(),
            "table_name": self.table_name,
            "record_id": self.record_id,
            "payload": self.payload,
        })
    }
}
