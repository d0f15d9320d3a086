use crate::envelope::{content_hash, open, seal, BackupKey, BackupPayload};
use crate::error::{BackupError, BackupResult};
use chrono::{DateTime, Duration, Utc};
use regcache_storage::{LocalStore, StorageResult};
use regcache_types::{time::now, BackupSnapshot};
use regcache_update::{BulkSnapshot, CutoverReport, RefreshOptions, StaticBulkSource, UpdateCoordinator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BLOB_EXTENSION: &str = "enc";

/// Audit actor for rows a restore changes.
pub const RESTORE_ACTOR: &str = "backup-restore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub rows: usize,
    pub cutover: CutoverReport,
}

/// Creates, restores and expires encrypted snapshots of the active instance.
pub struct BackupManager {
    store: LocalStore,
    coordinator: Arc<UpdateCoordinator>,
    key: BackupKey,
    dir: PathBuf,
    retention: Duration,
}

impl BackupManager {
    pub fn new(
        store: LocalStore,
        coordinator: Arc<UpdateCoordinator>,
        key: BackupKey,
        dir: impl Into<PathBuf>,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            coordinator,
            key,
            dir: dir.into(),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshots every record of the active instance.
    pub async fn create(&self) -> BackupResult<BackupSnapshot> {
        let id = Uuid::now_v7().to_string();
        let created_at = now();

        let (source_instance, records) = self.blocking(|store| store.export_active()).await?;
        let row_count = records.len();

        let key = self.key.clone();
        let payload = BackupPayload {
            snapshot_id: id.clone(),
            created_at,
            source_instance,
            records,
        };
        let (sealed, hash) = tokio::task::spawn_blocking(move || -> BackupResult<_> {
            let plaintext = serde_json::to_vec(&payload)?;
            let hash = content_hash(&plaintext);
            Ok((seal(&key, &plaintext)?, hash))
        })
        .await??;

        let blob_ref = format!("{id}.{BLOB_EXTENSION}");
        self.write_blob(&blob_ref, &sealed).await?;

        let snapshot = BackupSnapshot {
            id: id.clone(),
            created_at,
            retention_until: created_at + self.retention,
            encrypted_blob_ref: blob_ref.clone(),
            source_instance,
            row_count: row_count as i64,
            content_hash: hash,
        };
        let record = snapshot.clone();
        if let Err(e) = self.blocking(move |store| store.insert_backup(&record)).await {
            error!("failed to record backup {id}: {e}");
            let path = self.dir.join(&blob_ref);
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!("could not remove orphaned blob {}: {cleanup}", path.display());
            }
            return Err(e);
        }

        info!("created backup {id}: {row_count} rows from instance {source_instance}");
        Ok(snapshot)
    }

    /// Restores a snapshot through a verified cutover.
    ///
    /// Writes made after the snapshot was taken are not carried forward.
    pub async fn restore(&self, snapshot_id: &str) -> BackupResult<RestoreReport> {
        let lookup = snapshot_id.to_string();
        let snapshot = self
            .blocking(move |store| store.get_backup(&lookup))
            .await?
            .ok_or_else(|| BackupError::NotFound(snapshot_id.to_string()))?;

        let path = self.dir.join(&snapshot.encrypted_blob_ref);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| BackupError::io(&path, e))?;

        let key = self.key.clone();
        let meta = snapshot.clone();
        let payload = tokio::task::spawn_blocking(move || -> BackupResult<BackupPayload> {
            let plaintext = open(&key, &meta.id, &bytes)?;
            if content_hash(&plaintext) != meta.content_hash {
                return Err(BackupError::HashMismatch {
                    id: meta.id.clone(),
                });
            }
            let payload: BackupPayload = serde_json::from_slice(&plaintext)
                .map_err(|e| BackupError::corrupt(&meta.id, e.to_string()))?;
            if payload.snapshot_id != meta.id || payload.records.len() as i64 != meta.row_count {
                return Err(BackupError::corrupt(&meta.id, "payload does not match metadata"));
            }
            Ok(payload)
        })
        .await??;

        let rows = payload.records.len();
        let bulk = BulkSnapshot::from_records(payload.records)
            .map_err(|e| BackupError::corrupt(snapshot_id, e.to_string()))?;
        let cutover = self
            .coordinator
            .refresh(
                &StaticBulkSource::new(bulk),
                RefreshOptions {
                    carry_forward_pending: false,
                    actor: RESTORE_ACTOR,
                },
            )
            .await?;

        info!("restored backup {snapshot_id}: {rows} rows now serving from {}", cutover.active);
        Ok(RestoreReport {
            snapshot_id: snapshot_id.to_string(),
            rows,
            cutover,
        })
    }

    /// All snapshots, newest first.
    pub async fn list(&self) -> BackupResult<Vec<BackupSnapshot>> {
        self.blocking(|store| store.list_backups()).await
    }

    /// Deletes snapshots whose retention ended at or before `now`.
    /// Returns the ids removed.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> BackupResult<Vec<String>> {
        let expired: Vec<BackupSnapshot> = self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.is_expired(now))
            .collect();

        let mut pruned = Vec::with_capacity(expired.len());
        for snapshot in expired {
            let path = self.dir.join(&snapshot.encrypted_blob_ref);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("blob for backup {} already gone", snapshot.id);
                }
                Err(e) => {
                    warn!("could not delete blob {}: {e}", path.display());
                    return Err(BackupError::io(path, e));
                }
            }
            let id = snapshot.id.clone();
            self.blocking(move |store| store.delete_backup(&id)).await?;
            pruned.push(snapshot.id);
        }
        if !pruned.is_empty() {
            info!("pruned {} expired backups", pruned.len());
        }
        Ok(pruned)
    }

    /// Writes to a temp file first so a blob is either complete or absent.
    async fn write_blob(&self, blob_ref: &str, bytes: &[u8]) -> BackupResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BackupError::io(&self.dir, e))?;
        let path = self.dir.join(blob_ref);
        let tmp = self.dir.join(format!("{blob_ref}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| BackupError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BackupError::io(&path, e));
        }
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> BackupResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}
