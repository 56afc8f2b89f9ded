use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

/// Row counts per vault table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VaultStats {
    pub identities: i64,
    pub sessions: i64,
    pub messages: i64,
    pub facts: i64,
    pub embeddings: i64,
    pub notes: i64,
}

pub fn vault_stats(conn: &Connection) -> Result<VaultStats> {
    let count = |table: &str| -> Result<i64> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    };

    Ok(VaultStats {
        identities: count("identities")?,
        sessions: count("sessions")?,
        messages: count("messages")?,
        facts: count("facts")?,
        embeddings: count("embeddings")?,
        notes: count("notes")?,
    })
}
