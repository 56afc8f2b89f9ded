use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::crypto::ContentCipher;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub executor: ExecutorConfig,
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Application data directory holding the vault, legacy files, and migration log.
    pub app_data_dir: String,
    /// Display name for the local identity when none can be derived from legacy data.
    pub display_name: String,
    /// Optional 64-hex-char key enabling content encryption for newly created vaults.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub max_facts: usize,
    pub recent_summaries: usize,
    pub min_confidence: f64,
    pub max_pii_level: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            app_data_dir: default_app_data_dir().to_string_lossy().into_owned(),
            display_name: "User".into(),
            encryption_key: None,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".into(),
            api_key: None,
            poll_interval_ms: 1500,
            request_timeout_secs: 30,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_facts: 20,
            recent_summaries: 3,
            min_confidence: 0.1,
            max_pii_level: 2,
        }
    }
}

/// Returns the platform data directory for memvault, e.g. `~/.local/share/memvault`.
pub fn default_app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memvault")
}

/// Returns the default config file path: `{config_dir}/memvault/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(default_app_data_dir)
        .join("memvault")
        .join("config.toml")
}

impl VaultConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            VaultConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMVAULT_APP_DATA") {
            self.storage.app_data_dir = val;
        }
        if let Ok(val) = std::env::var("MEMVAULT_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MEMVAULT_ENCRYPTION_KEY") {
            self.storage.encryption_key = Some(val);
        }
        if let Ok(val) = std::env::var("MEMVAULT_EXECUTOR_URL") {
            self.executor.base_url = val;
        }
        if let Ok(val) = std::env::var("MEMVAULT_API_KEY") {
            self.executor.api_key = Some(val);
        }
    }

    /// Filesystem layout rooted at the configured app data directory.
    pub fn paths(&self) -> VaultPaths {
        VaultPaths::new(expand_tilde(&self.storage.app_data_dir))
    }

    /// Content cipher from `storage.encryption_key`, if one is configured.
    pub fn cipher(&self) -> Result<Option<ContentCipher>> {
        self.storage
            .encryption_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(ContentCipher::from_hex)
            .transpose()
            .context("invalid storage.encryption_key")
    }
}

/// Where the vault, the legacy memory files, and the migration log live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    app_data_dir: PathBuf,
}

/// Legacy file names, in import order.
pub const LEGACY_FILES: [&str; 4] = [
    "profile.json",
    "facts.json",
    "conversations.json",
    "preferences.json",
];

impl VaultPaths {
    pub fn new(app_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_data_dir: app_data_dir.into(),
        }
    }

    pub fn app_data_dir(&self) -> &Path {
        &self.app_data_dir
    }

    /// `{appData}/memory-vault.db`
    pub fn vault_file(&self) -> PathBuf {
        self.app_data_dir.join("memory-vault.db")
    }

    /// `{appData}/memories`
    pub fn legacy_dir(&self) -> PathBuf {
        self.app_data_dir.join("memories")
    }

    /// `{appData}/memories-backup`
    pub fn backup_dir(&self) -> PathBuf {
        self.app_data_dir.join("memories-backup")
    }

    /// `{appData}/vault-migration.log`
    pub fn migration_log(&self) -> PathBuf {
        self.app_data_dir.join("vault-migration.log")
    }

    /// Legacy files that currently exist on disk.
    pub fn existing_legacy_files(&self) -> Vec<PathBuf> {
        let dir = self.legacy_dir();
        LEGACY_FILES
            .iter()
            .map(|name| dir.join(name))
            .filter(|p| p.is_file())
            .collect()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = VaultConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.storage.display_name, "User");
        assert!(config.storage.encryption_key.is_none());
        assert_eq!(config.executor.poll_interval_ms, 1500);
        assert_eq!(config.context.max_pii_level, 2);
        assert!(config.storage.app_data_dir.ends_with("memvault"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
app_data_dir = "/tmp/assistant"

[executor]
base_url = "https://agent.example.com/api"
poll_interval_ms = 250
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.app_data_dir, "/tmp/assistant");
        assert_eq!(config.executor.base_url, "https://agent.example.com/api");
        assert_eq!(config.executor.poll_interval_ms, 250);
        // defaults still apply for unset fields
        assert_eq!(config.executor.request_timeout_secs, 30);
        assert_eq!(config.context.max_facts, 20);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = VaultConfig::default();
        std::env::set_var("MEMVAULT_APP_DATA", "/tmp/override");
        std::env::set_var("MEMVAULT_LOG_LEVEL", "trace");
        std::env::set_var("MEMVAULT_EXECUTOR_URL", "http://localhost:9999");

        config.apply_env_overrides();

        assert_eq!(config.storage.app_data_dir, "/tmp/override");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.executor.base_url, "http://localhost:9999");

        std::env::remove_var("MEMVAULT_APP_DATA");
        std::env::remove_var("MEMVAULT_LOG_LEVEL");
        std::env::remove_var("MEMVAULT_EXECUTOR_URL");
    }

    #[test]
    fn encryption_key_is_validated() {
        let mut config = VaultConfig::default();
        assert!(config.cipher().unwrap().is_none());

        config.storage.encryption_key = Some("ab".repeat(32));
        assert!(config.cipher().unwrap().is_some());

        config.storage.encryption_key = Some("xyz".into());
        assert!(config.cipher().is_err());
    }

    #[test]
    fn paths_follow_app_data_layout() {
        let paths = VaultPaths::new("/data/app");
        assert_eq!(paths.vault_file(), PathBuf::from("/data/app/memory-vault.db"));
        assert_eq!(paths.legacy_dir(), PathBuf::from("/data/app/memories"));
        assert_eq!(
            paths.migration_log(),
            PathBuf::from("/data/app/vault-migration.log")
        );
    }
}
