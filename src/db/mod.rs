pub mod meta;
pub mod migrations;
pub mod schema;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::crypto::{self, ContentCipher};

/// An open vault: the SQLite connection plus the content cipher, if the vault is encrypted.
#[derive(Debug)]
pub struct Vault {
    pub conn: Connection,
    cipher: Option<ContentCipher>,
    path: Option<PathBuf>,
}

impl Vault {
    /// Cipher for sealing message/note content. `None` for plaintext vaults.
    pub fn cipher(&self) -> Option<&ContentCipher> {
        self.cipher.as_ref()
    }

    /// Backing file, or `None` for in-memory vaults.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("failed to close vault")
    }
}

/// Open (or create) the vault at the given path with schema initialized and
/// compatibility checked. `key` enables content encryption for new vaults and is
/// required for vaults created encrypted.
pub fn open_vault(path: impl AsRef<Path>, key: Option<&ContentCipher>) -> Result<Vault> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open vault at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    let cipher = prepare(&conn, key)?;

    tracing::info!(path = %path.display(), encrypted = cipher.is_some(), "vault opened");
    Ok(Vault {
        conn,
        cipher,
        path: Some(path.to_path_buf()),
    })
}

/// Open an in-memory vault (tests, dry runs).
pub fn open_memory_vault(key: Option<&ContentCipher>) -> Result<Vault> {
    let conn = Connection::open_in_memory().context("failed to open in-memory vault")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    let cipher = prepare(&conn, key)?;
    Ok(Vault {
        conn,
        cipher,
        path: None,
    })
}

fn prepare(conn: &Connection, key: Option<&ContentCipher>) -> Result<Option<ContentCipher>> {
    schema::init_schema(conn).context("failed to initialize schema")?;
    migrations::check_schema_compat(conn)?;
    configure_encryption(conn, key)
}

/// Reconcile the configured key with the vault's recorded encryption mode.
fn configure_encryption(
    conn: &Connection,
    key: Option<&ContentCipher>,
) -> Result<Option<ContentCipher>> {
    let mode = meta::get_meta(conn, meta::ENCRYPTION)?;

    match (mode.as_deref(), key) {
        // New vault: the presence of a key decides the mode.
        (None, Some(cipher)) => {
            meta::set_meta(conn, meta::ENCRYPTION, crypto::ENCRYPTION_MODE)?;
            meta::set_meta(conn, meta::KEY_CHECK, &cipher.key_check_token()?)?;
            Ok(Some(cipher.clone()))
        }
        (None, None) => {
            meta::set_meta(conn, meta::ENCRYPTION, crypto::PLAINTEXT_MODE)?;
            Ok(None)
        }
        (Some(crypto::PLAINTEXT_MODE), Some(_)) => {
            tracing::warn!("encryption key configured but vault was created unencrypted; ignoring key");
            Ok(None)
        }
        (Some(crypto::PLAINTEXT_MODE), None) => Ok(None),
        (Some(crypto::ENCRYPTION_MODE), Some(cipher)) => {
            let token = meta::get_meta(conn, meta::KEY_CHECK)?.unwrap_or_default();
            if !cipher.verify_key_check(&token) {
                bail!("encryption key does not match this vault");
            }
            Ok(Some(cipher.clone()))
        }
        (Some(crypto::ENCRYPTION_MODE), None) => {
            bail!("vault is encrypted but no encryption key was provided")
        }
        (Some(other), _) => bail!("unknown vault encryption mode: {other}"),
    }
}

/// Health report for an open vault.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: String,
    pub encryption: String,
    pub migration_complete: bool,
    pub migrated_at: Option<String>,
    pub stats: crate::vault::stats::VaultStats,
}

/// Run `PRAGMA integrity_check` and collect vault metadata and row counts.
pub fn check_vault_health(conn: &Connection) -> Result<HealthReport> {
    let integrity_details: String =
        conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;

    Ok(HealthReport {
        integrity_ok: integrity_details == "ok",
        integrity_details,
        schema_version: migrations::get_schema_version(conn)?,
        encryption: meta::get_meta(conn, meta::ENCRYPTION)?
            .unwrap_or_else(|| crypto::PLAINTEXT_MODE.to_string()),
        migration_complete: meta::is_migration_complete(conn)?,
        migrated_at: meta::get_meta(conn, meta::MIGRATED_AT)?,
        stats: crate::vault::stats::vault_stats(conn)?,
    })
}

/// Paths SQLite may create next to a vault file.
pub fn vault_artifacts(path: &Path) -> Vec<PathBuf> {
    let base = path.as_os_str().to_owned();
    let mut artifacts = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut p = base.clone();
        p.push(suffix);
        artifacts.push(PathBuf::from(p));
    }
    artifacts
}

/// Delete a vault file and its SQLite siblings. Missing files are ignored.
pub fn remove_vault_files(path: &Path) -> Result<()> {
    for artifact in vault_artifacts(path) {
        match std::fs::remove_file(&artifact) {
            Ok(()) => tracing::debug!(path = %artifact.display(), "removed vault artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to remove {}", artifact.display()))
            }
        }
    }
    Ok(())
}
