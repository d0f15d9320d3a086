//! One JSON document per key on disk.

use crate::error::{CacheError, CacheResult};
use chrono::{DateTime, Utc};
use regcache_types::{time::now, RemoteRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub key: String,
    pub record: RemoteRecord,
    pub stored_at: DateTime<Utc>,
}

/// Directory-backed cache between the Local Store and the remote.
///
/// File names are the hex SHA-256 of the key, so any key is a safe name.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{name}.json"))
    }

    /// Reads the entry for `key`.
    ///
    /// A document that cannot be parsed, or that belongs to another key, is
    /// treated as a miss.
    pub async fn get(&self, key: &str) -> CacheResult<Option<FileEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        match serde_json::from_slice::<FileEntry>(&bytes) {
            Ok(entry) if entry.key == key => Ok(Some(entry)),
            Ok(_) => {
                warn!("file cache entry {} holds a different key", path.display());
                Ok(None)
            }
            Err(e) => {
                warn!("unreadable file cache entry {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Stores `record` under `key`, replacing any previous entry.
    pub async fn put(&self, key: &str, record: &RemoteRecord) -> CacheResult<FileEntry> {
        let entry = FileEntry {
            key: key.to_string(),
            record: record.clone(),
            stored_at: now(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::Io { path, source });
        }
        debug!("file cache stored {key}");
        Ok(entry)
    }

    /// Removes the entry for `key`. Returns whether one existed.
    pub async fn remove(&self, key: &str) -> CacheResult<bool> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}
