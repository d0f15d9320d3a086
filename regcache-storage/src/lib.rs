//! DuckDB storage layer for regcache.
//!
//! Provides the Local Store: the durable, synchronous source of truth for
//! cached regulatory records.
//!
//! # Architecture
//!
//! - Records live in two interchangeable tables (`records_a`, `records_b`);
//!   exactly one is active and serves reads and writes, the other is staging
//!   for blue/green refreshes
//! - Every data mutation appends a hash-chained entry to `audit_log` inside the
//!   same transaction, so a mutation and its audit entry commit or fail together
//! - Small keyed state (sync state, active instance, integrity hold) lives in `meta`
//! - Backup snapshot metadata lives in `backups`
//! - Bulk staging work runs on a second connection so it never contends with
//!   the serving connection

mod audit;
mod catalog;
mod error;
mod local_store;
mod schema;

pub use audit::{AuditDraft, AuditLog, Divergence, DivergenceKind, IntegrityReport};
pub use error::{StorageError, StorageResult};
pub use local_store::{ApplyOutcome, CachedRecord, CarryForward, LocalStore, UnsyncedRow};

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Opens the database file, applying memory and thread caps.
///
/// An unclean shutdown can leave a `<file>.wal` that DuckDB refuses to
/// replay. When the first open fails and such a file exists, it is set aside
/// as `<file>.wal.stale` and the open is retried once. Transactions that only
/// reached the stale WAL are lost, so the audit head may move backwards.
pub(crate) fn open_database(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            let wal = sibling(path, "wal");
            if !wal.exists() {
                return Err(err.into());
            }
            let stale = sibling(path, "wal.stale");
            warn!(
                "opening {} failed ({err}); moving {} aside and retrying",
                path.display(),
                wal.display()
            );
            if std::fs::rename(&wal, &stale).is_err() {
                return Err(err.into());
            }
            duckdb::Connection::open(path)?
        }
    };
    conn.execute_batch(&format!(
        "SET memory_limit = '{memory_limit}'; SET threads = {threads};"
    ))?;
    Ok(conn)
}

/// `data.duckdb` + `wal` -> `data.duckdb.wal`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Locks a connection, mapping poisoning to a storage error.
pub(crate) fn lock_conn<'a>(
    conn: &'a Mutex<duckdb::Connection>,
    which: &'static str,
) -> StorageResult<MutexGuard<'a, duckdb::Connection>> {
    conn.lock().map_err(|_| StorageError::LockPoisoned(which))
}
