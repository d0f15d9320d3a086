//! Bulk snapshot sources.

use crate::error::BulkSourceError;
use async_trait::async_trait;
use regcache_types::{payload_digest, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Expected contents of a snapshot, used to verify staging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub row_count: u64,
    /// Payload digest (see [`payload_digest`]) per record id.
    pub digests: BTreeMap<String, String>,
}

impl Manifest {
    /// Builds the manifest that exactly describes `records`.
    pub fn for_records(records: &[Record]) -> Result<Self, serde_json::Error> {
        let mut digests = BTreeMap::new();
        for record in records {
            digests.insert(record.id.clone(), payload_digest(&record.payload)?);
        }
        Ok(Self {
            row_count: records.len() as u64,
            digests,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSnapshot {
    pub records: Vec<Record>,
    pub manifest: Manifest,
}

impl BulkSnapshot {
    /// Wraps records with a manifest computed from them.
    pub fn from_records(records: Vec<Record>) -> Result<Self, BulkSourceError> {
        let manifest = Manifest::for_records(&records)
            .map_err(|e| BulkSourceError::Invalid(format!("cannot digest records: {e}")))?;
        Ok(Self { records, manifest })
    }
}

/// Produces a full snapshot of the dataset.
#[async_trait]
pub trait BulkSource: Send + Sync {
    async fn read_snapshot(&self) -> Result<BulkSnapshot, BulkSourceError>;
}

/// A snapshot already held in memory.
#[derive(Debug, Clone)]
pub struct StaticBulkSource {
    snapshot: BulkSnapshot,
}

impl StaticBulkSource {
    pub fn new(snapshot: BulkSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl BulkSource for StaticBulkSource {
    async fn read_snapshot(&self) -> Result<BulkSnapshot, BulkSourceError> {
        Ok(self.snapshot.clone())
    }
}

#[derive(Deserialize)]
struct SnapshotFile {
    records: Vec<Record>,
    manifest: Option<Manifest>,
}

/// Reads a JSON export of the form `{"records": [...], "manifest": {...}}`.
///
/// When the file carries no manifest, one is computed from the records, so
/// verification then only guards the load itself.
#[derive(Debug, Clone)]
pub struct JsonFileBulkSource {
    path: PathBuf,
}

impl JsonFileBulkSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BulkSource for JsonFileBulkSource {
    async fn read_snapshot(&self) -> Result<BulkSnapshot, BulkSourceError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            BulkSourceError::Unavailable(format!("{}: {e}", self.path.display()))
        })?;
        let file: SnapshotFile = serde_json::from_slice(&bytes)
            .map_err(|e| BulkSourceError::Invalid(format!("{}: {e}", self.path.display())))?;
        debug!(
            "read {} records from {}",
            file.records.len(),
            self.path.display()
        );
        match file.manifest {
            Some(manifest) => Ok(BulkSnapshot {
                records: file.records,
                manifest,
            }),
            None => BulkSnapshot::from_records(file.records),
        }
    }
}
