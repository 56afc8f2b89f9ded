//! Key-value access to the `meta` table: the vault's record of its own state.

use rusqlite::{params, Connection, OptionalExtension};

pub const SCHEMA_VERSION: &str = "schema_version";
pub const CREATED_AT: &str = "created_at";
pub const MIGRATION_COMPLETE: &str = "migration_complete";
pub const MIGRATED_AT: &str = "migrated_at";
pub const ENCRYPTION: &str = "encryption";
pub const KEY_CHECK: &str = "key_check";

/// Read a meta value, or `None` if the key is unset.
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()
}

/// Insert or overwrite a meta value.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// `true` once a legacy migration has committed into this vault.
pub fn is_migration_complete(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(get_meta(conn, MIGRATION_COMPLETE)?.as_deref() == Some("1"))
}

/// Stamp `migration_complete = '1'` and `migrated_at = now`.
pub fn mark_migration_complete(conn: &Connection) -> rusqlite::Result<()> {
    set_meta(conn, MIGRATION_COMPLETE, "1")?;
    set_meta(conn, MIGRATED_AT, &chrono::Utc::now().to_rfc3339())
}
