//! The Local Store: dual-instance record tables behind an active-instance pointer.
//!
//! Lock order is always `active` before a connection mutex. Reads and writes
//! hold the `active` read guard for their whole duration, so a cutover (which
//! takes the write guard) is never observed half way.

use crate::audit::{audit_head_sequence, audited_ids_since, AuditDraft, AuditLog};
use crate::error::{StorageError, StorageResult};
use crate::schema::{initialize_schema, read_meta, write_meta, META_ACTIVE_INSTANCE};
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use regcache_types::time::{from_millis, now, to_millis};
use regcache_types::{
    resolve_lww, AuditEntry, AuditEventType, InstanceLabel, LwwDecision, Record, RemoteRecord,
    SyncStatus,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info};

const RECORD_COLUMNS: &str = "id, payload_json, updated_at, sync_status, confidential, cached_at";

/// A record together with the time it was last written or confirmed locally.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub record: Record,
    pub cached_at: DateTime<Utc>,
}

/// What [`LocalStore::apply_remote`] did with a remote copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub decision: LwwDecision,
    /// Sync status of the local row before the apply, if there was one.
    pub previous_status: Option<SyncStatus>,
    /// Audit entry of the data change. `None` when no data changed.
    pub entry: Option<AuditEntry>,
}

impl ApplyOutcome {
    /// True when a non-clean local row lost to the remote copy.
    pub fn overwrote_local_change(&self) -> bool {
        self.decision == LwwDecision::TakeRemote
            && matches!(
                self.previous_status,
                Some(SyncStatus::Pending | SyncStatus::Conflict)
            )
    }
}

/// A non-clean row copied by carry-forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsyncedRow {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub status: SyncStatus,
}

/// Result of copying unsynced rows into a staging instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarryForward {
    /// Rows copied, sorted by id.
    pub rows: Vec<UnsyncedRow>,
    /// Ids that did not exist in staging before the copy.
    pub new_ids: Vec<String>,
    /// Audit head sequence at the moment the rows were read.
    pub audit_mark: i64,
}

/// Durable record store with audited writes.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    /// Second connection to the same database, used for staging work.
    staging: Arc<Mutex<Connection>>,
    active: Arc<RwLock<InstanceLabel>>,
    audit: AuditLog,
}

impl LocalStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path, audit_secret: &[u8]) -> StorageResult<Self> {
        let conn = crate::open_database(path, "256MB", 2)?;
        Self::from_connection(conn, audit_secret)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(audit_secret: &[u8]) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, audit_secret)
    }

    fn from_connection(conn: Connection, audit_secret: &[u8]) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        let active = match read_meta(&conn, META_ACTIVE_INSTANCE)? {
            Some(v) => v
                .parse::<InstanceLabel>()
                .map_err(|e| StorageError::corrupt("meta", e.to_string()))?,
            None => {
                write_meta(&conn, META_ACTIVE_INSTANCE, InstanceLabel::A.as_str())?;
                InstanceLabel::A
            }
        };
        let staging = conn.try_clone()?;
        let conn = Arc::new(Mutex::new(conn));
        let audit = AuditLog::new(Arc::clone(&conn), audit_secret)?;
        debug!("local store opened, active instance {active}");
        Ok(Self {
            conn,
            staging: Arc::new(Mutex::new(staging)),
            active: Arc::new(RwLock::new(active)),
            audit,
        })
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The instance currently serving reads and writes.
    pub fn active_instance(&self) -> StorageResult<InstanceLabel> {
        Ok(*self.read_active()?)
    }

    pub(crate) fn lock_serving(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        crate::lock_conn(&self.conn, "serving connection")
    }

    fn read_active(&self) -> StorageResult<RwLockReadGuard<'_, InstanceLabel>> {
        self.active
            .read()
            .map_err(|_| StorageError::LockPoisoned("active instance"))
    }

    // ── Serving path ──

    pub fn get(&self, id: &str) -> StorageResult<Option<Record>> {
        Ok(self.get_cached(id)?.map(|c| c.record))
    }

    /// Like [`get`](Self::get) but also returns `cached_at`.
    pub fn get_cached(&self, id: &str) -> StorageResult<Option<CachedRecord>> {
        let active = self.read_active()?;
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        select_one(&conn, active.table_name(), id)
    }

    /// Writes a record on behalf of the application.
    ///
    /// The row is stored `pending` regardless of the status on `record`;
    /// the confidential flag is kept as given.
    pub fn put(&self, record: &Record, actor: &str) -> StorageResult<AuditEntry> {
        let active = self.read_active()?;
        let table = active.table_name();
        let mut conn = crate::lock_conn(&self.conn, "serving connection")?;
        let tx = conn.transaction()?;

        let existed = select_one(&tx, table, &record.id)?.is_some();
        let mut stored = record.clone();
        stored.sync_status = SyncStatus::Pending;
        upsert_row(&tx, table, &stored, now())?;

        let entry = self.audit.append_in(
            &tx,
            AuditDraft {
                actor,
                event_type: if existed {
                    AuditEventType::Update
                } else {
                    AuditEventType::Insert
                },
                table_name: table,
                record_id: &stored.id,
                payload: Some(&stored.payload),
            },
        )?;
        tx.commit()?;
        Ok(entry)
    }

    /// Removes a record. Returns `None` if it did not exist.
    pub fn delete(&self, id: &str, actor: &str) -> StorageResult<Option<AuditEntry>> {
        let active = self.read_active()?;
        let table = active.table_name();
        let mut conn = crate::lock_conn(&self.conn, "serving connection")?;
        let tx = conn.transaction()?;

        let removed = tx.execute(&format!("DELETE FROM {table} WHERE id = ?"), params![id])?;
        if removed == 0 {
            return Ok(None);
        }
        let entry = self.audit.append_in(
            &tx,
            AuditDraft {
                actor,
                event_type: AuditEventType::Delete,
                table_name: table,
                record_id: id,
                payload: None,
            },
        )?;
        tx.commit()?;
        Ok(Some(entry))
    }

    /// Applies a remote copy with last-write-wins, in one transaction.
    ///
    /// - A losing local `conflict` row returns to `pending`.
    /// - A winning remote copy keeps the local confidential flag.
    /// - A remote copy identical to a clean local row only refreshes `cached_at`.
    pub fn apply_remote(&self, remote: &RemoteRecord, actor: &str) -> StorageResult<ApplyOutcome> {
        let active = self.read_active()?;
        let table = active.table_name();
        let mut conn = crate::lock_conn(&self.conn, "serving connection")?;
        let tx = conn.transaction()?;

        let local = select_one(&tx, table, &remote.id)?.map(|c| c.record);
        let decision = resolve_lww(local.as_ref(), remote);
        let previous_status = local.as_ref().map(|r| r.sync_status);
        let cached_at = now();

        let entry = match (decision, &local) {
            (LwwDecision::KeepLocal, Some(l)) => {
                if l.sync_status == SyncStatus::Conflict {
                    set_status(&tx, table, &l.id, SyncStatus::Pending)?;
                }
                None
            }
            (LwwDecision::TakeRemote, Some(l))
                if l.is_clean() && l.updated_at == remote.updated_at && l.payload == remote.payload =>
            {
                tx.execute(
                    &format!("UPDATE {table} SET cached_at = ? WHERE id = ?"),
                    params![to_millis(&cached_at), l.id],
                )?;
                None
            }
            _ => {
                let mut incoming = Record::from_remote(remote.clone());
                incoming.confidential = local.as_ref().is_some_and(|l| l.confidential);
                upsert_row(&tx, table, &incoming, cached_at)?;
                Some(self.audit.append_in(
                    &tx,
                    AuditDraft {
                        actor,
                        event_type: if local.is_some() {
                            AuditEventType::Update
                        } else {
                            AuditEventType::Insert
                        },
                        table_name: table,
                        record_id: &incoming.id,
                        payload: Some(&incoming.payload),
                    },
                )?)
            }
        };
        tx.commit()?;

        Ok(ApplyOutcome {
            decision,
            previous_status,
            entry,
        })
    }

    // ── Sync bookkeeping ──

    /// Pending, non-confidential records in push order.
    pub fn pending_for_push(&self) -> StorageResult<Vec<Record>> {
        let active = self.read_active()?;
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE sync_status = 'pending' AND confidential = FALSE ORDER BY updated_at, id",
            active.table_name()
        ))?;
        let rows = stmt
            .query_map([], raw_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|raw| raw.into_cached().map(|c| c.record))
            .collect()
    }

    pub fn count_pending_push(&self) -> StorageResult<u64> {
        let active = self.read_active()?;
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE sync_status = 'pending' AND confidential = FALSE",
                active.table_name()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Marks a pushed row clean, unless it was edited after it was read.
    pub fn mark_clean(&self, id: &str, expected_updated_at: DateTime<Utc>) -> StorageResult<bool> {
        self.transition_pending(id, expected_updated_at, SyncStatus::Clean)
    }

    /// Marks a row the remote refused as conflicting, unless it was edited after it was read.
    pub fn mark_conflict(
        &self,
        id: &str,
        expected_updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.transition_pending(id, expected_updated_at, SyncStatus::Conflict)
    }

    fn transition_pending(
        &self,
        id: &str,
        expected_updated_at: DateTime<Utc>,
        to: SyncStatus,
    ) -> StorageResult<bool> {
        let active = self.read_active()?;
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET sync_status = ? WHERE id = ? AND updated_at = ? AND sync_status = 'pending'",
                active.table_name()
            ),
            params![to.as_str(), id, to_millis(&expected_updated_at)],
        )?;
        Ok(changed > 0)
    }

    /// Every row of the active instance, with the label it was read from.
    pub fn export_active(&self) -> StorageResult<(InstanceLabel, Vec<Record>)> {
        let active = self.read_active()?;
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        let records = select_all(&conn, active.table_name())?
            .into_iter()
            .map(|c| c.record)
            .collect();
        Ok((*active, records))
    }

    pub fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        read_meta(&conn, key)
    }

    pub fn put_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = crate::lock_conn(&self.conn, "serving connection")?;
        write_meta(&conn, key, value)
    }

    // ── Staging ──

    fn ensure_staging(&self, label: InstanceLabel) -> StorageResult<()> {
        if *self.read_active()? == label {
            return Err(StorageError::ActiveInstance(label));
        }
        Ok(())
    }

    /// Removes every row of a non-active instance.
    pub fn clear_instance(&self, label: InstanceLabel) -> StorageResult<()> {
        self.ensure_staging(label)?;
        let conn = crate::lock_conn(&self.staging, "staging connection")?;
        conn.execute(&format!("DELETE FROM {}", label.table_name()), [])?;
        debug!("cleared instance {label}");
        Ok(())
    }

    /// Bulk-loads records into a non-active instance in one transaction.
    ///
    /// Bulk loads are not row-audited.
    pub fn load_instance(&self, label: InstanceLabel, records: &[Record]) -> StorageResult<usize> {
        self.ensure_staging(label)?;
        let table = label.table_name();
        let cached_at = now();
        let mut conn = crate::lock_conn(&self.staging, "staging connection")?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
            ))?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    serde_json::to_string(&record.payload)?,
                    to_millis(&record.updated_at),
                    record.sync_status.as_str(),
                    record.confidential,
                    to_millis(&cached_at),
                ])?;
            }
        }
        tx.commit()?;
        info!("loaded {} rows into instance {label}", records.len());
        Ok(records.len())
    }

    /// Copies the active instance's non-clean rows into `to`.
    pub fn carry_forward(&self, to: InstanceLabel) -> StorageResult<CarryForward> {
        let active = self.read_active()?;
        if *active == to {
            return Err(StorageError::ActiveInstance(to));
        }
        // Audited writes hold the serving connection, so the mark and the rows agree.
        let (source, audit_mark) = {
            let conn = crate::lock_conn(&self.conn, "serving connection")?;
            (
                select_non_clean(&conn, active.table_name())?,
                audit_head_sequence(&conn)?,
            )
        };
        drop(active);

        let table = to.table_name();
        let cached_at = now();
        let mut carried = CarryForward {
            audit_mark,
            ..CarryForward::default()
        };
        let mut conn = crate::lock_conn(&self.staging, "staging connection")?;
        let tx = conn.transaction()?;
        for cached in &source {
            let record = &cached.record;
            if select_one(&tx, table, &record.id)?.is_none() {
                carried.new_ids.push(record.id.clone());
            }
            upsert_row(&tx, table, record, cached_at)?;
            carried.rows.push(UnsyncedRow {
                id: record.id.clone(),
                updated_at: record.updated_at,
                status: record.sync_status,
            });
        }
        tx.commit()?;
        carried.rows.sort_by(|a, b| a.id.cmp(&b.id));
        carried.new_ids.sort();
        if !carried.rows.is_empty() {
            info!(
                "carried {} unsynced rows into instance {to} ({} new)",
                carried.rows.len(),
                carried.new_ids.len()
            );
        }
        Ok(carried)
    }

    /// Row count of an instance, read over the staging connection.
    pub fn count_rows(&self, label: InstanceLabel) -> StorageResult<u64> {
        let conn = crate::lock_conn(&self.staging, "staging connection")?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", label.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Reads one row of a specific instance over the staging connection.
    pub fn get_from(&self, label: InstanceLabel, id: &str) -> StorageResult<Option<Record>> {
        let conn = crate::lock_conn(&self.staging, "staging connection")?;
        Ok(select_one(&conn, label.table_name(), id)?.map(|c| c.record))
    }

    /// Repoints serving traffic to `to`. Returns the previously active label.
    ///
    /// Every row whose served value changes is recorded in the audit log, in
    /// the same transaction as the persisted pointer. The in-memory pointer
    /// changes under the routing write lock; if anything fails nothing changes.
    pub fn switch_active(&self, to: InstanceLabel, actor: &str) -> StorageResult<InstanceLabel> {
        self.switch(to, actor, None)
    }

    /// Like [`switch_active`](Self::switch_active), but refuses with
    /// [`StorageError::ActiveChanged`] when an audited write reached the
    /// active instance after audit sequence `since`.
    ///
    /// The check runs under the routing write lock, so no write can land
    /// between it and the switch.
    pub fn switch_active_unless_changed(
        &self,
        to: InstanceLabel,
        actor: &str,
        since: i64,
    ) -> StorageResult<InstanceLabel> {
        self.switch(to, actor, Some(since))
    }

    fn switch(
        &self,
        to: InstanceLabel,
        actor: &str,
        since: Option<i64>,
    ) -> StorageResult<InstanceLabel> {
        let mut active = self
            .active
            .write()
            .map_err(|_| StorageError::LockPoisoned("active instance"))?;
        let previous = *active;
        let mut conn = crate::lock_conn(&self.conn, "serving connection")?;
        let tx = conn.transaction()?;

        if let Some(since) = since {
            let ids = audited_ids_since(&tx, previous.table_name(), since)?;
            if !ids.is_empty() {
                return Err(StorageError::ActiveChanged {
                    instance: previous,
                    ids,
                });
            }
        }

        let changed = if previous == to {
            0
        } else {
            self.audit_switch(&tx, previous, to, actor)?
        };
        write_meta(&tx, META_ACTIVE_INSTANCE, to.as_str())?;
        tx.commit()?;
        *active = to;
        info!("active instance switched {previous} -> {to} ({changed} rows changed)");
        Ok(previous)
    }

    /// Appends one entry per row that differs between `from` and `to`.
    fn audit_switch(
        &self,
        conn: &Connection,
        from: InstanceLabel,
        to: InstanceLabel,
        actor: &str,
    ) -> StorageResult<usize> {
        let mut before: BTreeMap<String, Record> = select_all(conn, from.table_name())?
            .into_iter()
            .map(|c| (c.record.id.clone(), c.record))
            .collect();
        let table = to.table_name();
        let mut changed = 0;

        for cached in select_all(conn, table)? {
            let record = cached.record;
            let event_type = match before.remove(&record.id) {
                None => AuditEventType::Insert,
                Some(old)
                    if old.payload == record.payload
                        && old.updated_at == record.updated_at
                        && old.confidential == record.confidential =>
                {
                    continue;
                }
                Some(_) => AuditEventType::Update,
            };
            self.audit.append_in(
                conn,
                AuditDraft {
                    actor,
                    event_type,
                    table_name: table,
                    record_id: &record.id,
                    payload: Some(&record.payload),
                },
            )?;
            changed += 1;
        }

        for id in before.keys() {
            self.audit.append_in(
                conn,
                AuditDraft {
                    actor,
                    event_type: AuditEventType::Delete,
                    table_name: table,
                    record_id: id,
                    payload: None,
                },
            )?;
            changed += 1;
        }
        Ok(changed)
    }
}
}

// ── Row helpers ──

struct RawRow {
    id: String,
    payload_json: String,
    updated_at: i64,
    sync_status: String,
    confidential: bool,
    cached_at: i64,
}

fn raw_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        payload_json: row.get(1)?,
        updated_at: row.get(2)?,
        sync_status: row.get(3)?,
        confidential: row.get(4)?,
        cached_at: row.get(5)?,
    })
}

impl RawRow {
    fn into_cached(self) -> StorageResult<CachedRecord> {
        let sync_status = self
            .sync_status
            .parse::<SyncStatus>()
            .map_err(|e| StorageError::corrupt("records", e.to_string()))?;
        Ok(CachedRecord {
            record: Record {
                id: self.id,
                payload: serde_json::from_str(&self.payload_json)?,
                updated_at: from_millis(self.updated_at),
                sync_status,
                confidential: self.confidential,
            },
            cached_at: from_millis(self.cached_at),
        })
    }
}

fn select_one(conn: &Connection, table: &str, id: &str) -> StorageResult<Option<CachedRecord>> {
    let result = conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM {table} WHERE id = ?"),
        params![id],
        raw_from_row,
    );
    match result {
        Ok(raw) => Ok(Some(raw.into_cached()?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn select_all(conn: &Connection, table: &str) -> StorageResult<Vec<CachedRecord>> {
    select_where(conn, table, "TRUE")
}

fn select_non_clean(conn: &Connection, table: &str) -> StorageResult<Vec<CachedRecord>> {
    select_where(conn, table, "sync_status <> 'clean'")
}

fn select_where(conn: &Connection, table: &str, filter: &str) -> StorageResult<Vec<CachedRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM {table} WHERE {filter} ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([], raw_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawRow::into_cached).collect()
}

fn upsert_row(
    conn: &Connection,
    table: &str,
    record: &Record,
    cached_at: DateTime<Utc>,
) -> StorageResult<()> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO {table} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
        params![
            record.id,
            serde_json::to_string(&record.payload)?,
            to_millis(&record.updated_at),
            record.sync_status.as_str(),
            record.confidential,
            to_millis(&cached_at),
        ],
    )?;
    Ok(())
}

fn set_status(conn: &Connection, table: &str, id: &str, status: SyncStatus) -> StorageResult<()> {
    conn.execute(
        &format!("UPDATE {table} SET sync_status = ? WHERE id = ?"),
        params![status.as_str(), id],
    )?;
    Ok(())
}
