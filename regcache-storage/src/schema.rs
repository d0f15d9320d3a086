use crate::error::StorageResult;
use duckdb::Connection;
use regcache_types::InstanceLabel;

pub(crate) const META_ACTIVE_INSTANCE: &str = "active_instance";
pub(crate) const META_INTEGRITY_HOLD: &str = "integrity_hold";

pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    for label in [InstanceLabel::A, InstanceLabel::B] {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id VARCHAR PRIMARY KEY,
                payload_json TEXT NOT NULL,
                updated_at BIGINT NOT NULL,
                sync_status VARCHAR NOT NULL,
                confidential BOOLEAN NOT NULL DEFAULT FALSE,
                cached_at BIGINT NOT NULL
            );
            "#,
            table = label.table_name()
        ))?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            sequence_number BIGINT PRIMARY KEY,
            timestamp_ms BIGINT NOT NULL,
            actor VARCHAR NOT NULL,
            event_type VARCHAR NOT NULL,
            table_name VARCHAR NOT NULL,
            record_id VARCHAR NOT NULL,
            payload_json TEXT,
            checksum VARCHAR NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meta (
            key VARCHAR PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS backups (
            id VARCHAR PRIMARY KEY,
            created_at BIGINT NOT NULL,
            retention_until BIGINT NOT NULL,
            blob_ref VARCHAR NOT NULL,
            source_instance VARCHAR NOT NULL,
            row_count BIGINT NOT NULL,
            content_hash VARCHAR NOT NULL
        );
        "#,
    )?;
    Ok(())
}

pub(crate) fn read_meta(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM meta WHERE key = ?",
        duckdb::params![key],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        duckdb::params![key, value],
    )?;
    Ok(())
}

pub(crate) fn delete_meta(conn: &Connection, key: &str) -> StorageResult<()> {
    conn.execute("DELETE FROM meta WHERE key = ?", duckdb::params![key])?;
    Ok(())
}
