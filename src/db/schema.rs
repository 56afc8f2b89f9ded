//! SQL DDL for all vault tables.
//!
//! Defines `identities`, `sessions`, `messages`, `facts`, `embeddings`, `notes`,
//! `sessions_fts` (FTS5 over session metadata only), and `meta`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.
//!
//! Message and note content are never indexed: `sessions_fts` is an external-content
//! index over `sessions(title, goal)` kept in sync by triggers.

use rusqlite::{params, Connection};

use super::meta;

/// All schema DDL statements for the vault's core tables.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    title TEXT,
    goal TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_identity ON sessions(identity_id);
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK(role IN ('user','assistant','system')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at);

-- Messages are append-only
CREATE TRIGGER IF NOT EXISTS messages_immutable BEFORE UPDATE ON messages
BEGIN
    SELECT RAISE(ABORT, 'messages are immutable');
END;

-- One belief per (identity, category, predicate); a new write replaces the old row
CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    category TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    pii_level INTEGER NOT NULL DEFAULT 0 CHECK(pii_level >= 0 AND pii_level <= 3),
    consent_scope TEXT NOT NULL DEFAULT 'default'
        CHECK(consent_scope IN ('default','analytics_off','never_upload')),
    source_message_id TEXT REFERENCES messages(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_reinforced_at TEXT NOT NULL,
    decay_halflife_days REAL NOT NULL DEFAULT 90.0 CHECK(decay_halflife_days > 0.0),
    UNIQUE(identity_id, category, predicate) ON CONFLICT REPLACE
);

CREATE INDEX IF NOT EXISTS idx_facts_category ON facts(identity_id, category);

CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    ref_type TEXT NOT NULL CHECK(ref_type IN ('message','fact','note')),
    ref_id TEXT NOT NULL,
    model TEXT NOT NULL,
    dims INTEGER NOT NULL CHECK(dims > 0),
    vector BLOB NOT NULL CHECK(length(vector) = dims * 4),
    created_at TEXT NOT NULL,
    UNIQUE(ref_type, ref_id) ON CONFLICT REPLACE
);

CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK(kind IN ('session_summary','profile','user_note')),
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    source_session_id TEXT REFERENCES sessions(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_kind ON notes(identity_id, kind, created_at);

-- Full-text search over non-sensitive session metadata only
CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
    title,
    goal,
    content='sessions',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS sessions_fts_insert AFTER INSERT ON sessions
BEGIN
    INSERT INTO sessions_fts (rowid, title, goal) VALUES (new.rowid, new.title, new.goal);
END;

CREATE TRIGGER IF NOT EXISTS sessions_fts_delete AFTER DELETE ON sessions
BEGIN
    INSERT INTO sessions_fts (sessions_fts, rowid, title, goal)
        VALUES ('delete', old.rowid, old.title, old.goal);
END;

CREATE TRIGGER IF NOT EXISTS sessions_fts_update AFTER UPDATE ON sessions
BEGIN
    INSERT INTO sessions_fts (sessions_fts, rowid, title, goal)
        VALUES ('delete', old.rowid, old.title, old.goal);
    INSERT INTO sessions_fts (rowid, title, goal) VALUES (new.rowid, new.title, new.goal);
END;

-- Vault-wide state
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables and seed `meta`. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let now = chrono::Utc::now().to_rfc3339();
    for (key, value) in [
        (meta::SCHEMA_VERSION, super::migrations::CURRENT_SCHEMA_VERSION),
        (meta::CREATED_AT, now.as_str()),
        (meta::MIGRATION_COMPLETE, "0"),
    ] {
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }

    Ok(())
}
