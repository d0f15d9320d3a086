//! Tamper-evident audit ledger.
//!
//! Each entry's checksum is `sha256(previous_checksum ‖ canonical(entry) ‖ secret)`.
//! Altering, removing or reordering any entry breaks every checksum after it.
//! Appends never take the connection lock themselves; they run inside the
//! caller's transaction so a mutation and its entry commit together.

use crate::error::{StorageError, StorageResult};
use crate::schema::{delete_meta, read_meta, write_meta, META_INTEGRITY_HOLD};
use duckdb::{params, Connection};
use regcache_types::time::{from_millis, now, to_millis};
use regcache_types::{to_canonical_bytes, AuditEntry, AuditEventType};
use sha2::{Digest, Sha256};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info, warn};

/// A mutation about to be recorded.
#[derive(Debug, Clone, Copy)]
pub struct AuditDraft<'a> {
    pub actor: &'a str,
    pub event_type: AuditEventType,
    pub table_name: &'a str,
    pub record_id: &'a str,
    pub payload: Option<&'a serde_json::Value>,
}

/// Why verification stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceKind {
    /// The next stored sequence number is not the one expected.
    SequenceGap { expected: i64, found: i64 },
    /// The stored checksum does not match the recomputed one.
    ChecksumMismatch,
    /// A ranged walk could not find the entry preceding the range.
    MissingAnchor,
    /// The row could not be decoded.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub sequence_number: i64,
    pub kind: DivergenceKind,
}

/// Result of a chain walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Entries whose checksum was recomputed and matched.
    pub entries_checked: u64,
    pub first_divergence: Option<Divergence>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.first_divergence.is_none()
    }
}

/// Handle to the `audit_log` table.
#[derive(Clone)]
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
    secret: Arc<[u8]>,
    /// Sequence number at which an unresolved divergence was found.
    hold: Arc<RwLock<Option<i64>>>,
}

struct RawEntry {
    sequence_number: i64,
    timestamp_ms: i64,
    actor: String,
    event_type: String,
    table_name: String,
    record_id: String,
    payload_json: Option<String>,
    checksum: String,
}

const SELECT_COLUMNS: &str = "SELECT sequence_number, timestamp_ms, actor, event_type, \
     table_name, record_id, payload_json, checksum FROM audit_log";

impl AuditLog {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, secret: &[u8]) -> StorageResult<Self> {
        let hold = {
            let guard = crate::lock_conn(&conn, "audit connection")?;
            read_meta(&guard, META_INTEGRITY_HOLD)?.and_then(|v| v.parse::<i64>().ok())
        };
        if let Some(seq) = hold {
            warn!("audit integrity hold is in place (divergence at sequence {seq})");
        }
        Ok(Self {
            conn,
            secret: Arc::from(secret),
            hold: Arc::new(RwLock::new(hold)),
        })
    }

    /// Appends an entry using the caller's connection or transaction.
    ///
    /// Fails with [`StorageError::Integrity`] while a hold is in place.
    pub fn append_in(&self, conn: &Connection, draft: AuditDraft<'_>) -> StorageResult<AuditEntry> {
        if let Some(seq) = self.held_at()? {
            return Err(StorageError::Integrity(seq));
        }

        let tip = conn.query_row(
            "SELECT sequence_number, checksum FROM audit_log ORDER BY sequence_number DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        );
        let (prev_seq, prev_checksum) = match tip {
            Ok(t) => t,
            Err(duckdb::Error::QueryReturnedNoRows) => (0, String::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entry = AuditEntry {
            sequence_number: prev_seq + 1,
            timestamp: now(),
            actor: draft.actor.to_string(),
            event_type: draft.event_type,
            table_name: draft.table_name.to_string(),
            record_id: draft.record_id.to_string(),
            payload: draft.payload.cloned(),
            checksum: String::new(),
        };
        entry.checksum = chain_checksum(&prev_checksum, &entry, &self.secret)?;

        let payload_json = entry.payload.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO audit_log (sequence_number, timestamp_ms, actor, event_type, table_name, record_id, payload_json, checksum)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.sequence_number,
                to_millis(&entry.timestamp),
                entry.actor,
                entry.event_type.as_str(),
                entry.table_name,
                entry.record_id,
                payload_json,
                entry.checksum,
            ],
        )?;
        Ok(entry)
    }

    /// Walks the chain (or a sub-range of it) and reports the first divergence.
    ///
    /// A divergence places a persisted integrity hold.
    pub fn verify_integrity(
        &self,
        range: Option<RangeInclusive<i64>>,
    ) -> StorageResult<IntegrityReport> {
        let (start, rows, anchor) = {
            let conn = crate::lock_conn(&self.conn, "audit connection")?;
            match &range {
                None => (1, query_raw(&conn, 1, i64::MAX)?, Some(String::new())),
                Some(r) => {
                    let start = (*r.start()).max(1);
                    let rows = query_raw(&conn, start, *r.end())?;
                    let anchor = if start == 1 {
                        Some(String::new())
                    } else {
                        stored_checksum(&conn, start - 1)?
                    };
                    (start, rows, anchor)
                }
            }
        };

        let report = walk_chain(start, &rows, anchor, &self.secret);
        if let Some(divergence) = &report.first_divergence {
            error!(
                sequence = divergence.sequence_number,
                kind = ?divergence.kind,
                checked = report.entries_checked,
                "audit chain verification failed; placing integrity hold"
            );
            self.place_hold(divergence.sequence_number)?;
        }
        Ok(report)
    }

    /// Entries within `range`, in sequence order.
    pub fn entries(&self, range: RangeInclusive<i64>) -> StorageResult<Vec<AuditEntry>> {
        let conn = crate::lock_conn(&self.conn, "audit connection")?;
        query_raw(&conn, *range.start(), *range.end())?
            .iter()
            .map(RawEntry::to_entry)
            .collect()
    }

    /// The latest entry, if any.
    pub fn head(&self) -> StorageResult<Option<AuditEntry>> {
        let conn = crate::lock_conn(&self.conn, "audit connection")?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY sequence_number DESC LIMIT 1"))?;
        let mut rows = stmt.query_map([], raw_from_row)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.to_entry()?)),
            None => Ok(None),
        }
    }

    pub fn is_on_hold(&self) -> bool {
        self.held_at().ok().flatten().is_some()
    }

    /// Sequence number at which the current hold was placed.
    pub fn held_at(&self) -> StorageResult<Option<i64>> {
        let hold = self
            .hold
            .read()
            .map_err(|_| StorageError::LockPoisoned("integrity hold"))?;
        Ok(*hold)
    }

    /// Lifts the integrity hold after operator review.
    pub fn release_hold(&self) -> StorageResult<()> {
        let conn = crate::lock_conn(&self.conn, "audit connection")?;
        delete_meta(&conn, META_INTEGRITY_HOLD)?;
        let mut hold = self
            .hold
            .write()
            .map_err(|_| StorageError::LockPoisoned("integrity hold"))?;
        if let Some(seq) = hold.take() {
            info!("integrity hold released (was placed at sequence {seq})");
        }
        Ok(())
    }

    fn place_hold(&self, sequence_number: i64) -> StorageResult<()> {
        let conn = crate::lock_conn(&self.conn, "audit connection")?;
        write_meta(&conn, META_INTEGRITY_HOLD, &sequence_number.to_string())?;
        let mut hold = self
            .hold
            .write()
            .map_err(|_| StorageError::LockPoisoned("integrity hold"))?;
        *hold = Some(sequence_number);
        Ok(())
    }
}

/// Highest sequence number in the ledger, or 0 when it is empty.
pub(crate) fn audit_head_sequence(conn: &Connection) -> StorageResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(sequence_number), 0) FROM audit_log",
        [],
        |row| row.get(0),
    )?)
}

/// Ids with an entry against `table` after sequence `since`, sorted.
pub(crate) fn audited_ids_since(
    conn: &Connection,
    table: &str,
    since: i64,
) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT record_id FROM audit_log WHERE table_name = ? AND sequence_number > ? ORDER BY record_id",
    )?;
    let ids = stmt
        .query_map(params![table, since], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn chain_checksum(prev: &str, entry: &AuditEntry, secret: &[u8]) -> StorageResult<String> {
    let canonical = to_canonical_bytes(&entry.canonical_document())?;
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(&canonical);
    hasher.update(secret);
    Ok(hex::encode(hasher.finalize()))
}

fn walk_chain(
    start: i64,
    rows: &[RawEntry],
    anchor: Option<String>,
    secret: &[u8],
) -> IntegrityReport {
    let mut checked = 0u64;
    let diverged = |sequence_number, kind, checked| IntegrityReport {
        entries_checked: checked,
        first_divergence: Some(Divergence {
            sequence_number,
            kind,
        }),
    };

    let mut prev = match anchor {
        Some(a) => a,
        None if rows.is_empty() => {
            return IntegrityReport {
                entries_checked: 0,
                first_divergence: None,
            };
        }
        None => return diverged(start - 1, DivergenceKind::MissingAnchor, 0),
    };

    let mut expected = start;
    for raw in rows {
        if raw.sequence_number != expected {
            return diverged(
                expected,
                DivergenceKind::SequenceGap {
                    expected,
                    found: raw.sequence_number,
                },
                checked,
            );
        }
        let stored = raw.checksum.clone();
        let entry = match raw.to_entry() {
            Ok(e) => e,
            Err(e) => {
                return diverged(expected, DivergenceKind::Malformed(e.to_string()), checked);
            }
        };
        match chain_checksum(&prev, &entry, secret) {
            Ok(computed) if computed == stored => {}
            Ok(_) => return diverged(expected, DivergenceKind::ChecksumMismatch, checked),
            Err(e) => {
                return diverged(expected, DivergenceKind::Malformed(e.to_string()), checked);
            }
        }
        checked += 1;
        expected += 1;
        prev = stored;
    }

    IntegrityReport {
        entries_checked: checked,
        first_divergence: None,
    }
}

fn query_raw(conn: &Connection, from: i64, to: i64) -> StorageResult<Vec<RawEntry>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE sequence_number >= ? AND sequence_number <= ? ORDER BY sequence_number"
    ))?;
    let rows = stmt
        .query_map(params![from, to], raw_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn stored_checksum(conn: &Connection, sequence_number: i64) -> StorageResult<Option<String>> {
    let result = conn.query_row(
        "SELECT checksum FROM audit_log WHERE sequence_number = ?",
        params![sequence_number],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(c) => Ok(Some(c)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn raw_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawEntry> {
    Ok(RawEntry {
        sequence_number: row.get(0)?,
        timestamp_ms: row.get(1)?,
        actor: row.get(2)?,
        event_type: row.get(3)?,
        table_name: row.get(4)?,
        record_id: row.get(5)?,
        payload_json: row.get(6)?,
        checksum: row.get(7)?,
    })
}

impl RawEntry {
    fn to_entry(&self) -> StorageResult<AuditEntry> {
        let event_type = self
            .event_type
            .parse::<AuditEventType>()
            .map_err(|e| StorageError::corrupt("audit_log", e.to_string()))?;
        let payload = self
            .payload_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(AuditEntry {
            sequence_number: self.sequence_number,
            timestamp: from_millis(self.timestamp_ms),
            actor: self.actor.clone(),
            event_type,
            table_name: self.table_name.clone(),
            record_id: self.record_id.clone(),
            payload,
            checksum: self.checksum.clone(),
        })
    }
}
