//! Derived notes: session summaries, rolling profiles, and free-form user notes.

use anyhow::Result;
use rusqlite::{params, Connection};

use super::types::{parse_column, Note, NoteKind};
use crate::crypto::{self, ContentCipher};

pub fn add_note(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    identity_id: &str,
    kind: NoteKind,
    text: &str,
    source_session_id: Option<&str>,
) -> Result<Note> {
    let note = Note {
        id: uuid::Uuid::now_v7().to_string(),
        identity_id: identity_id.to_string(),
        kind,
        text: text.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        source_session_id: source_session_id.map(str::to_string),
    };
    insert_note(conn, cipher, &note)?;
    Ok(note)
}

/// Insert a fully-specified note row (used by the legacy importer).
pub fn insert_note(conn: &Connection, cipher: Option<&ContentCipher>, note: &Note) -> Result<()> {
    conn.execute(
        "INSERT INTO notes (id, identity_id, kind, text, created_at, source_session_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            note.id,
            note.identity_id,
            note.kind.as_str(),
            crypto::seal_opt(cipher, &note.text)?,
            note.created_at,
            note.source_session_id,
        ],
    )?;
    Ok(())
}

/// Notes for an identity, newest first, optionally filtered by kind.
pub fn list_notes(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    identity_id: &str,
    kind: Option<NoteKind>,
    limit: usize,
) -> Result<Vec<Note>> {
    let mut stmt = conn.prepare(
        "SELECT id, identity_id, kind, text, created_at, source_session_id FROM notes \
         WHERE identity_id = ?1 AND (?2 IS NULL OR kind = ?2) \
         ORDER BY created_at DESC, rowid DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            params![identity_id, kind.map(|k| k.as_str()), limit as i64],
            |row| {
                Ok(Note {
                    id: row.get(0)?,
                    identity_id: row.get(1)?,
                    kind: parse_column(row.get(2)?, 2)?,
                    text: row.get(3)?,
                    created_at: row.get(4)?,
                    source_session_id: row.get(5)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|mut n| {
            n.text = crypto::open_opt(cipher, n.text)?;
            Ok(n)
        })
        .collect()
}
