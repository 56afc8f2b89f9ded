//! Schema version compatibility.
//!
//! The vault records its schema version in `meta.schema_version`. Opening a vault
//! checks that version against the ones this binary understands and upgrades older
//! ones forward before any other code touches the tables.

use anyhow::{bail, Result};
use rusqlite::Connection;

use super::meta;

/// The schema version that the current binary writes.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0";

/// Every schema version this binary can open, oldest first.
const KNOWN_VERSIONS: &[&str] = &["1.0"];

/// Get the schema version stored in the vault.
pub fn get_schema_version(conn: &Connection) -> Result<String> {
    match meta::get_meta(conn, meta::SCHEMA_VERSION)? {
        Some(version) => Ok(version),
        None => bail!("vault has no schema_version in meta"),
    }
}

/// Refuse to open vaults written by an unknown (newer or foreign) schema, then run any
/// pending forward-only upgrades.
pub fn check_schema_compat(conn: &Connection) -> Result<()> {
    let stored = get_schema_version(conn)?;
    let Some(position) = KNOWN_VERSIONS.iter().position(|v| *v == stored) else {
        bail!(
            "unsupported vault schema version {stored} (this build understands {})",
            KNOWN_VERSIONS.join(", ")
        );
    };

    for next in &KNOWN_VERSIONS[position + 1..] {
        tracing::info!(from = %stored, to = %next, "upgrading vault schema");
        // No upgrade steps exist yet beyond the version bump.
        meta::set_meta(conn, meta::SCHEMA_VERSION, next)?;
    }

    tracing::debug!(schema_version = %stored, "vault schema compatible");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn fresh_vault_reports_current_version() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        check_schema_compat(&conn).unwrap();
    }

    #[test]
    fn compat_check_is_idempotent() {
        let conn = test_db();
        check_schema_compat(&conn).unwrap();
        check_schema_compat(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = test_db();
        meta::set_meta(&conn, meta::SCHEMA_VERSION, "9.0").unwrap();
        let err = check_schema_compat(&conn).unwrap_err();
        assert!(err.to_string().contains("unsupported vault schema version 9.0"));
    }
}
