//! Startup orchestration: migrate if needed, open the vault, register handlers.
//!
//! ```text
//! Uninitialized ──(no vault, no legacy)──▶ FreshInit ──▶ Ready
//! Uninitialized ──(no vault, legacy)─────▶ Migrating ──▶ Ready | FallbackLegacy
//! Uninitialized ──(vault exists)─────────▶ Loading ────▶ Ready
//! any ──(open fails)─────────────────────▶ FallbackLegacy
//! any ──(cleanup)────────────────────────▶ Closed
//! ```
//!
//! Failures never abort the process: [`VaultManager::initialize`] returns `false` and the
//! caller keeps using the legacy code path.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::config::{VaultConfig, VaultPaths};
use crate::crypto::ContentCipher;
use crate::db;
use crate::handlers::{HandlerRegistry, SharedVault, VaultHandlers, CHANNELS};
use crate::migrate::{MigrationEngine, MigrationEvent};
use crate::vault::identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    Uninitialized,
    FreshInit,
    Migrating,
    Loading,
    Ready,
    FallbackLegacy,
    Closed,
}

pub struct VaultManager {
    paths: VaultPaths,
    config: VaultConfig,
    cipher: Option<ContentCipher>,
    engine: MigrationEngine,
    registry: Arc<dyn HandlerRegistry>,
    vault: SharedVault,
    identity_id: Mutex<Option<String>>,
    state: watch::Sender<VaultState>,
    history: Mutex<Vec<VaultState>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl VaultManager {
    /// Fails only on configuration errors (e.g. a malformed encryption key).
    pub fn new(config: VaultConfig, registry: Arc<dyn HandlerRegistry>) -> Result<Self> {
        let paths = config.paths();
        let cipher = config.cipher()?;
        let engine = MigrationEngine::new(paths.clone(), cipher.clone(), &config.storage.display_name);
        let (state, _) = watch::channel(VaultState::Uninitialized);

        Ok(Self {
            paths,
            config,
            cipher,
            engine,
            registry,
            vault: Arc::new(Mutex::new(None)),
            identity_id: Mutex::new(None),
            state,
            history: Mutex::new(vec![VaultState::Uninitialized]),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn state(&self) -> VaultState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == VaultState::Ready
    }

    /// Every state entered so far, starting with `Uninitialized`.
    pub fn history(&self) -> Vec<VaultState> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<VaultState> {
        self.state.subscribe()
    }

    pub fn subscribe_migration(&self) -> broadcast::Receiver<MigrationEvent> {
        self.engine.subscribe()
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn identity_id(&self) -> Option<String> {
        self.identity_id.lock().ok().and_then(|id| id.clone())
    }

    /// The shared vault handle; holds `None` until ready and after cleanup.
    pub fn vault(&self) -> SharedVault {
        Arc::clone(&self.vault)
    }

    fn transition(&self, next: VaultState) {
        let prev = self.state.send_replace(next);
        if let Ok(mut history) = self.history.lock() {
            history.push(next);
        }
        info!(from = ?prev, to = ?next, "vault state changed");
    }

    /// Bring the vault up. Returns `true` when it reached `Ready`; on `false` the caller
    /// should fall back to the legacy store. Calling again after the first run does nothing
    /// and reports the current readiness.
    pub async fn initialize(&self) -> bool {
        let _guard = self.init_lock.lock().await;

        let current = self.state();
        if current != VaultState::Uninitialized {
            info!(state = ?current, "vault already initialized");
            return current == VaultState::Ready;
        }

        match self.bring_up().await {
            Ok(()) => {
                self.transition(VaultState::Ready);
                true
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "vault initialization failed; using legacy store");
                self.transition(VaultState::FallbackLegacy);
                false
            }
        }
    }

    async fn bring_up(&self) -> Result<()> {
        if self.paths.vault_file().exists() {
            self.transition(VaultState::Loading);
        } else if self.engine.is_needed() {
            self.transition(VaultState::Migrating);
            let engine = self.engine.clone();
            tokio::task::spawn_blocking(move || engine.run())
                .await
                .map_err(|e| anyhow!("migration task failed: {e}"))??;
        } else {
            self.transition(VaultState::FreshInit);
        }

        let path = self.paths.vault_file();
        let cipher = self.cipher.clone();
        let display_name = self.config.storage.display_name.clone();
        let (vault, who) = tokio::task::spawn_blocking(move || -> Result<_> {
            let vault = db::open_vault(&path, cipher.as_ref())?;
            let who = identity::ensure_identity(&vault.conn, &display_name)?;
            Ok((vault, who))
        })
        .await
        .map_err(|e| anyhow!("vault open task failed: {e}"))??;

        *self
            .vault
            .lock()
            .map_err(|e| anyhow!("vault lock poisoned: {e}"))? = Some(vault);
        if let Ok(mut id) = self.identity_id.lock() {
            *id = Some(who.id.clone());
        }

        VaultHandlers::new(self.vault(), &who.id, self.config.context.clone())
            .register_all(self.registry.as_ref());
        info!(identity = %who.id, "vault handlers registered");
        Ok(())
    }

    /// Unregister handlers and close the vault. Safe to call more than once.
    pub fn cleanup(&self) {
        if self.state() == VaultState::Closed {
            return;
        }

        let removed = CHANNELS
            .iter()
            .filter(|channel| self.registry.unregister(channel))
            .count();

        let vault = match self.vault.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                warn!(error = %e, "vault lock poisoned during cleanup");
                None
            }
        };
        if let Some(vault) = vault {
            if let Err(e) = vault.close() {
                warn!(error = %format!("{e:#}"), "vault did not close cleanly");
            }
        }

        info!(handlers = removed, "vault closed");
        self.transition(VaultState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::LocalRegistry;
    use tempfile::TempDir;

    fn manager(tmp: &TempDir) -> (VaultManager, LocalRegistry) {
        let mut config = VaultConfig::default();
        config.storage.app_data_dir = tmp.path().to_string_lossy().into_owned();
        let registry = LocalRegistry::new();
        let manager = VaultManager::new(config, Arc::new(registry.clone())).unwrap();
        (manager, registry)
    }

    #[tokio::test]
    async fn fresh_install_reaches_ready() {
        let tmp = TempDir::new().unwrap();
        let (manager, registry) = manager(&tmp);

        assert!(manager.initialize().await);
        assert_eq!(
            manager.history(),
            vec![VaultState::Uninitialized, VaultState::FreshInit, VaultState::Ready]
        );
        assert!(registry.is_registered(crate::handlers::STATUS));
        assert!(manager.identity_id().is_some());
    }

    #[tokio::test]
    async fn second_initialize_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let (manager, _) = manager(&tmp);

        assert!(manager.initialize().await);
        assert!(manager.initialize().await);
        assert_eq!(manager.history().len(), 3);
    }

    #[tokio::test]
    async fn cleanup_unregisters_and_closes() {
        let tmp = TempDir::new().unwrap();
        let (manager, registry) = manager(&tmp);
        manager.initialize().await;

        manager.cleanup();
        manager.cleanup();

        assert_eq!(manager.state(), VaultState::Closed);
        assert!(registry.channels().is_empty());
        assert!(manager.vault().lock().unwrap().is_none());
        assert_eq!(manager.history().iter().filter(|s| **s == VaultState::Closed).count(), 1);
    }

    #[test]
    fn malformed_key_is_a_config_error() {
        let mut config = VaultConfig::default();
        config.storage.encryption_key = Some("not-hex".into());
        assert!(VaultManager::new(config, Arc::new(LocalRegistry::new())).is_err());
    }
}
