#![allow(dead_code)]

use memvault::config::{VaultConfig, VaultPaths};
use memvault::db::{self, Vault};
use memvault::vault::identity;
use std::path::Path;
use tempfile::TempDir;

/// Open a fresh in-memory plaintext vault with one identity. Returns the vault and identity id.
pub fn test_vault() -> (Vault, String) {
    let vault = db::open_memory_vault(None).unwrap();
    let who = identity::ensure_identity(&vault.conn, "Ada").unwrap().id;
    (vault, who)
}

/// Config rooted at a temporary app data directory.
pub fn config_in(tmp: &TempDir) -> VaultConfig {
    let mut config = VaultConfig::default();
    config.storage.app_data_dir = tmp.path().to_string_lossy().into_owned();
    config
}

pub fn paths_in(tmp: &TempDir) -> VaultPaths {
    VaultPaths::new(tmp.path())
}

/// Write `body` to `{appData}/memories/{name}`.
pub fn write_legacy(paths: &VaultPaths, name: &str, body: &str) {
    let dir = paths.legacy_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), body).unwrap();
}

/// Any file in `dir` whose name starts with `memory-vault.db`.
pub fn vault_artifacts_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("memory-vault.db"))
        .collect()
}

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
