//! One-shot import of the legacy flat-JSON memory store into the vault.
//!
//! Migration runs only when no vault file exists and at least one legacy file does. The
//! vault is built beside its final location as `memory-vault.db.migrating` inside a single
//! transaction and renamed into place only after commit, so a failed run never leaves a
//! vault file behind. Legacy files are copied to `memories-backup/` first; [`MigrationEngine::rollback`]
//! restores them and removes the vault.

pub mod legacy;
pub mod log;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{VaultPaths, LEGACY_FILES};
use crate::crypto::ContentCipher;
use crate::db::{self, meta};
use crate::vault::facts::{self, NewFact};
use crate::vault::types::{Message, Note, NoteKind, Session};
use crate::vault::{identity, messages, notes, preferences, sessions};
use legacy::{LegacyConversation, LegacyData};
use log::LogEntry;

/// Category assigned to scalar attributes found in `profile.json`.
pub const PROFILE_CATEGORY: &str = "personal";

/// Rows written by a successful migration, per entity type.
///
/// Counts come from the finished vault, so `facts` and `preferences` split by stored
/// category rather than by source file. A `facts.json` entry in the `preference` category
/// lands in `preferences`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub identities: i64,
    pub facts: i64,
    pub preferences: i64,
    pub sessions: i64,
    pub messages: i64,
    pub notes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    Started,
    Completed(MigrationStats),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    Migrated(MigrationStats),
    /// A vault already exists, or there is nothing to import.
    NotNeeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub restored_files: Vec<String>,
    pub vault_removed: bool,
}

/// True iff no vault file exists and at least one legacy file does.
pub fn migration_needed(paths: &VaultPaths) -> bool {
    !paths.vault_file().exists() && !paths.existing_legacy_files().is_empty()
}

#[derive(Debug, Clone)]
pub struct MigrationEngine {
    paths: VaultPaths,
    cipher: Option<ContentCipher>,
    default_display_name: String,
    events: broadcast::Sender<MigrationEvent>,
}

impl MigrationEngine {
    pub fn new(paths: VaultPaths, cipher: Option<ContentCipher>, default_display_name: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            paths,
            cipher,
            default_display_name: default_display_name.to_string(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.events.subscribe()
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn is_needed(&self) -> bool {
        migration_needed(&self.paths)
    }

    /// Run the migration if it is needed. Blocking; call from the blocking pool in async code.
    ///
    /// Every attempt that actually starts is recorded in the migration log.
    pub fn run(&self) -> Result<MigrationOutcome> {
        if !self.is_needed() {
            debug!(dir = %self.paths.app_data_dir().display(), "migration not needed");
            return Ok(MigrationOutcome::NotNeeded);
        }

        let _ = self.events.send(MigrationEvent::Started);
        info!(legacy_dir = %self.paths.legacy_dir().display(), "starting legacy migration");
        let started = Instant::now();

        match self.migrate() {
            Ok(stats) => {
                let elapsed = started.elapsed().as_millis() as u64;
                info!(
                    facts = stats.facts,
                    sessions = stats.sessions,
                    messages = stats.messages,
                    elapsed_ms = elapsed,
                    "legacy migration complete"
                );
                self.log(&LogEntry::success(stats.clone(), elapsed));
                let _ = self.events.send(MigrationEvent::Completed(stats.clone()));
                Ok(MigrationOutcome::Migrated(stats))
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                warn!(error = %format!("{e:#}"), "legacy migration failed");
                if let Err(cleanup) = db::remove_vault_files(&self.temp_vault_file()) {
                    warn!(error = %cleanup, "failed to remove partial vault");
                }
                self.log(&LogEntry::failure(&e, elapsed));
                let _ = self.events.send(MigrationEvent::Failed(format!("{e:#}")));
                Err(e)
            }
        }
    }

    /// Restore legacy files from the backup and delete the vault. Never runs automatically.
    pub fn rollback(&self) -> Result<RollbackReport> {
        match self.restore_backup() {
            Ok(report) => {
                info!(restored = report.restored_files.len(), "migration rolled back");
                self.log(&LogEntry::rollback(None));
                Ok(report)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "rollback failed");
                self.log(&LogEntry::rollback(Some(&e)));
                Err(e)
            }
        }
    }

    fn temp_vault_file(&self) -> PathBuf {
        let mut name = self.paths.vault_file().into_os_string();
        name.push(".migrating");
        PathBuf::from(name)
    }

    fn log(&self, entry: &LogEntry) {
        if let Err(e) = log::append_entry(&self.paths.migration_log(), entry) {
            warn!(error = %e, "failed to write migration log");
        }
    }

    fn migrate(&self) -> Result<MigrationStats> {
        // Parse everything before touching the disk; any malformed file aborts here.
        let data = LegacyData::load(&self.paths.legacy_dir())?;
        self.backup_legacy_files()?;

        let temp = self.temp_vault_file();
        db::remove_vault_files(&temp)?;

        let mut vault = db::open_vault(&temp, self.cipher.as_ref())?;
        let tx = vault.conn.transaction()?;
        let stats = import(&tx, self.cipher.as_ref(), &data, &self.default_display_name)?;
        meta::mark_migration_complete(&tx)?;
        tx.commit().context("failed to commit migrated vault")?;

        vault
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("failed to checkpoint migrated vault")?;
        vault.close()?;

        let target = self.paths.vault_file();
        std::fs::rename(&temp, &target).with_context(|| {
            format!("failed to move migrated vault into {}", target.display())
        })?;
        // Leftover -wal/-shm of the temp name, if SQLite kept any.
        if let Err(e) = db::remove_vault_files(&temp) {
            debug!(error = %e, "temp vault siblings not removed");
        }

        Ok(stats)
    }

    fn backup_legacy_files(&self) -> Result<()> {
        let backup = self.paths.backup_dir();
        std::fs::create_dir_all(&backup)
            .with_context(|| format!("failed to create backup dir {}", backup.display()))?;
        for src in self.paths.existing_legacy_files() {
            let Some(name) = src.file_name() else { continue };
            std::fs::copy(&src, backup.join(name))
                .with_context(|| format!("failed to back up {}", src.display()))?;
        }
        debug!(dir = %backup.display(), "legacy files backed up");
        Ok(())
    }

    fn restore_backup(&self) -> Result<RollbackReport> {
        let backup = self.paths.backup_dir();
        let available: Vec<&str> = LEGACY_FILES
            .iter()
            .copied()
            .filter(|name| backup.join(name).is_file())
            .collect();
        if available.is_empty() {
            bail!("no legacy backup found at {}", backup.display());
        }

        let legacy_dir = self.paths.legacy_dir();
        std::fs::create_dir_all(&legacy_dir)?;
        for name in &available {
            std::fs::copy(backup.join(name), legacy_dir.join(name))
                .with_context(|| format!("failed to restore {name}"))?;
        }

        let vault_file = self.paths.vault_file();
        let vault_removed = vault_file.exists();
        db::remove_vault_files(&vault_file)?;

        Ok(RollbackReport {
            restored_files: available.into_iter().map(str::to_string).collect(),
            vault_removed,
        })
    }
}

/// Map legacy records onto vault rows. The caller owns the transaction.
fn import(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    data: &LegacyData,
    default_display_name: &str,
) -> Result<MigrationStats> {
    let profile = data.profile.as_ref();
    let display_name = profile
        .and_then(|p| p.name.as_deref())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(default_display_name);
    let who = identity::create_identity(conn, profile.and_then(|p| p.id.as_deref()), display_name)?;

    if let Some(profile) = profile {
        for (key, value) in &profile.attributes {
            let Some(value) = value else { continue };
            facts::upsert_fact(conn, &who.id, &NewFact::new(PROFILE_CATEGORY, key, &value.to_text()))
                .with_context(|| format!("profile.json: attribute {key}"))?;
        }
    }

    for (i, legacy) in data.facts.iter().enumerate() {
        let mut fact = NewFact::new(&legacy.category, &legacy.predicate, &legacy.object.to_text());
        if let Some(confidence) = legacy.confidence {
            fact.confidence = confidence;
        }
        fact.pii_level = legacy.pii_level.unwrap_or(0);
        fact.created_at = legacy.created_at.as_ref().map(|t| t.to_rfc3339()).transpose()?;
        facts::upsert_fact(conn, &who.id, &fact)
            .with_context(|| format!("facts.json: entry {i}"))?;
    }

    for (i, conversation) in data.conversations.iter().enumerate() {
        import_conversation(conn, cipher, &who.id, conversation)
            .with_context(|| format!("conversations.json: entry {i}"))?;
    }

    for (key, value) in &data.preferences {
        let text = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        preferences::set_preference(conn, &who.id, key, &text)
            .with_context(|| format!("preferences.json: key {key}"))?;
    }

    collect_stats(conn)
}

fn import_conversation(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    identity_id: &str,
    conversation: &LegacyConversation,
) -> Result<()> {
    let first_message_at = conversation
        .messages
        .first()
        .and_then(|m| m.timestamp.as_ref());
    let started_at = match conversation.started_at.as_ref().or(first_message_at) {
        Some(ts) => ts.to_rfc3339()?,
        None => chrono::Utc::now().to_rfc3339(),
    };

    let session = Session {
        id: conversation
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
        identity_id: identity_id.to_string(),
        started_at: started_at.clone(),
        ended_at: conversation.ended_at.as_ref().map(|t| t.to_rfc3339()).transpose()?,
        title: conversation.title.clone(),
        goal: conversation.goal.clone(),
    };
    sessions::insert_session(conn, &session)?;

    for legacy in &conversation.messages {
        let created_at = match &legacy.timestamp {
            Some(ts) => ts.to_rfc3339()?,
            None => started_at.clone(),
        };
        messages::insert_message(
            conn,
            cipher,
            &Message {
                id: uuid::Uuid::now_v7().to_string(),
                session_id: session.id.clone(),
                role: legacy.role,
                content: legacy.content.clone(),
                created_at,
            },
        )?;
    }

    if let Some(summary) = conversation.summary.as_deref().filter(|s| !s.is_empty()) {
        notes::insert_note(
            conn,
            cipher,
            &Note {
                id: uuid::Uuid::now_v7().to_string(),
                identity_id: identity_id.to_string(),
                kind: NoteKind::SessionSummary,
                text: summary.to_string(),
                created_at: session.ended_at.clone().unwrap_or(started_at),
                source_session_id: Some(session.id.clone()),
            },
        )?;
    }

    Ok(())
}

/// Final row counts; replaced duplicates in the legacy data are not double-counted.
fn collect_stats(conn: &Connection) -> Result<MigrationStats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(MigrationStats {
        identities: count("SELECT COUNT(*) FROM identities")?,
        facts: count("SELECT COUNT(*) FROM facts WHERE category != 'preference'")?,
        preferences: count("SELECT COUNT(*) FROM facts WHERE category = 'preference'")?,
        sessions: count("SELECT COUNT(*) FROM sessions")?,
        messages: count("SELECT COUNT(*) FROM messages")?,
        notes: count("SELECT COUNT(*) FROM notes")?,
    })
}
