//! Local user identities. Deleting an identity cascades to its sessions, messages,
//! facts, and notes.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::Identity;

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        display_name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Create an identity. `id` defaults to a fresh UUID v7.
pub fn create_identity(conn: &Connection, id: Option<&str>, display_name: &str) -> Result<Identity> {
    let id = id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO identities (id, display_name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![id, display_name, now],
    )?;

    tracing::debug!(id = %id, "identity created");
    Ok(Identity {
        id,
        display_name: display_name.to_string(),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub fn get_identity(conn: &Connection, id: &str) -> Result<Option<Identity>> {
    Ok(conn
        .query_row(
            "SELECT id, display_name, created_at, updated_at FROM identities WHERE id = ?1",
            params![id],
            row_to_identity,
        )
        .optional()?)
}

/// Return the oldest identity, creating one named `display_name` if the vault has none.
pub fn ensure_identity(conn: &Connection, display_name: &str) -> Result<Identity> {
    let existing = conn
        .query_row(
            "SELECT id, display_name, created_at, updated_at FROM identities \
             ORDER BY created_at, rowid LIMIT 1",
            [],
            row_to_identity,
        )
        .optional()?;

    match existing {
        Some(identity) => Ok(identity),
        None => create_identity(conn, None, display_name),
    }
}

pub fn rename_identity(conn: &Connection, id: &str, display_name: &str) -> Result<()> {
    let rows = conn.execute(
        "UPDATE identities SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
        params![display_name, chrono::Utc::now().to_rfc3339(), id],
    )?;
    if rows == 0 {
        bail!("identity not found: {id}");
    }
    Ok(())
}

/// Delete an identity and everything it owns.
pub fn delete_identity(conn: &Connection, id: &str) -> Result<()> {
    let rows = conn.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
    if rows == 0 {
        bail!("identity not found: {id}");
    }
    tracing::info!(id = %id, "identity deleted");
    Ok(())
}
