//! Conversation sessions and metadata search.
//!
//! Only `title` and `goal` are searchable; message content never reaches the FTS index.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::Session;

const SESSION_COLUMNS: &str = "id, identity_id, started_at, ended_at, title, goal";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        started_at: row.get(2)?,
        ended_at: row.get(3)?,
        title: row.get(4)?,
        goal: row.get(5)?,
    })
}

/// Open a new session for `identity_id`.
pub fn start_session(
    conn: &Connection,
    identity_id: &str,
    title: Option<&str>,
    goal: Option<&str>,
) -> Result<Session> {
    let session = Session {
        id: uuid::Uuid::now_v7().to_string(),
        identity_id: identity_id.to_string(),
        started_at: chrono::Utc::now().to_rfc3339(),
        ended_at: None,
        title: title.map(str::to_string),
        goal: goal.map(str::to_string),
    };
    insert_session(conn, &session)?;
    tracing::debug!(id = %session.id, "session started");
    Ok(session)
}

/// Insert a fully-specified session row (used by the legacy importer).
pub fn insert_session(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, identity_id, started_at, ended_at, title, goal) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session.id,
            session.identity_id,
            session.started_at,
            session.ended_at,
            session.title,
            session.goal,
        ],
    )?;
    Ok(())
}

/// Close a session. Ending an already-ended session keeps the original end time.
pub fn end_session(conn: &Connection, session_id: &str) -> Result<Session> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE sessions SET ended_at = COALESCE(ended_at, ?1) WHERE id = ?2",
        params![now, session_id],
    )?;
    match get_session(conn, session_id)? {
        Some(session) => Ok(session),
        None => bail!("session not found: {session_id}"),
    }
}

/// Set title and goal, e.g. once the assistant has worked out what a session is about.
pub fn update_session_metadata(
    conn: &Connection,
    session_id: &str,
    title: Option<&str>,
    goal: Option<&str>,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE sessions SET title = ?1, goal = ?2 WHERE id = ?3",
        params![title, goal, session_id],
    )?;
    if rows == 0 {
        bail!("session not found: {session_id}");
    }
    Ok(())
}

pub fn get_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![session_id],
            row_to_session,
        )
        .optional()?)
}

/// Most recent sessions first.
pub fn list_sessions(conn: &Connection, identity_id: &str, limit: usize) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE identity_id = ?1 \
         ORDER BY started_at DESC LIMIT ?2"
    ))?;
    let sessions = stmt
        .query_map(params![identity_id, limit as i64], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sessions)
}

/// Delete a session and (via cascade) its messages.
pub fn delete_session(conn: &Connection, session_id: &str) -> Result<()> {
    let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
    if rows == 0 {
        bail!("session not found: {session_id}");
    }
    Ok(())
}

/// Full-text search over session titles and goals, best match first.
pub fn search_sessions(conn: &Connection, query: &str, limit: usize) -> Result<Vec<Session>> {
    let match_expr = fts_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT s.id, s.identity_id, s.started_at, s.ended_at, s.title, s.goal \
         FROM sessions_fts JOIN sessions s ON s.rowid = sessions_fts.rowid \
         WHERE sessions_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let sessions = stmt
        .query_map(params![match_expr, limit as i64], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sessions)
}

/// Quote each term so user input cannot inject FTS5 syntax.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" ")
}
