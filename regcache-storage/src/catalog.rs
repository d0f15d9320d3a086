//! Backup snapshot metadata (`backups` table).

use crate::error::{StorageError, StorageResult};
use crate::local_store::LocalStore;
use duckdb::params;
use regcache_types::time::{from_millis, to_millis};
use regcache_types::{BackupSnapshot, InstanceLabel};

const SNAPSHOT_COLUMNS: &str =
    "id, created_at, retention_until, blob_ref, source_instance, row_count, content_hash";

type RawSnapshot = (String, i64, i64, String, String, i64, String);

impl LocalStore {
    pub fn insert_backup(&self, snapshot: &BackupSnapshot) -> StorageResult<()> {
        let conn = self.lock_serving()?;
        conn.execute(
            &format!("INSERT INTO backups ({SNAPSHOT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
            params![
                snapshot.id,
                to_millis(&snapshot.created_at),
                to_millis(&snapshot.retention_until),
                snapshot.encrypted_blob_ref,
                snapshot.source_instance.as_str(),
                snapshot.row_count,
                snapshot.content_hash,
            ],
        )?;
        Ok(())
    }

    pub fn get_backup(&self, id: &str) -> StorageResult<Option<BackupSnapshot>> {
        let conn = self.lock_serving()?;
        let result = conn.query_row(
            &format!("SELECT {SNAPSHOT_COLUMNS} FROM backups WHERE id = ?"),
            params![id],
            raw_snapshot,
        );
        match result {
            Ok(raw) => Ok(Some(into_snapshot(raw)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All snapshots, newest first.
    pub fn list_backups(&self) -> StorageResult<Vec<BackupSnapshot>> {
        let conn = self.lock_serving()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM backups ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], raw_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_snapshot).collect()
    }

    pub fn delete_backup(&self, id: &str) -> StorageResult<bool> {
        let conn = self.lock_serving()?;
        let removed = conn.execute("DELETE FROM backups WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }
}

fn raw_snapshot(row: &duckdb::Row<'_>) -> duckdb::Result<RawSnapshot> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_snapshot(raw: RawSnapshot) -> StorageResult<BackupSnapshot> {
    let (id, created_at, retention_until, blob_ref, source_instance, row_count, content_hash) = raw;
    let source_instance = source_instance
        .parse::<InstanceLabel>()
        .map_err(|e| StorageError::corrupt("backups", e.to_string()))?;
    Ok(BackupSnapshot {
        id,
        created_at: from_millis(created_at),
        retention_until: from_millis(retention_until),
        encrypted_blob_ref: blob_ref,
        source_instance,
        row_count,
        content_hash,
    })
}
