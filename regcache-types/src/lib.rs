//! Core types for regcache.
//!
//! This crate defines the data model shared by every layer of the cache:
//!
//! - [`Record`]: a cached domain row with its local sync bookkeeping
//! - [`RemoteRecord`]: the wire shape exchanged with the remote backend
//! - [`AuditEntry`]: one link of the tamper-evident mutation ledger
//! - [`InstanceLabel`]: the A/B designation used for blue/green refreshes
//! - [`BackupSnapshot`]: metadata of an encrypted backup blob
//!
//! It also provides canonical JSON encoding (for hashing) and the
//! last-write-wins decision used by both sync pulls and read-path back-fill.

mod audit;
mod backup;
mod canonical;
mod instance;
mod lww;
mod record;
pub mod time;

pub use audit::{AuditEntry, AuditEventType};
pub use backup::BackupSnapshot;
pub use canonical::{payload_digest, to_canonical_bytes};
pub use instance::InstanceLabel;
pub use lww::{resolve_lww, LwwDecision};
pub use record::{Record, RemoteRecord, SyncStatus};

use thiserror::Error;

/// Error returned when a persisted enum value cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
