pub mod doctor;
pub mod facts;
pub mod rollback;
pub mod run;

use anyhow::{bail, Result};
use std::sync::Arc;

use memvault::config::VaultConfig;
use memvault::handlers::LocalRegistry;
use memvault::lifecycle::VaultManager;

/// Bring the vault up through the lifecycle manager and print what happened.
pub async fn init(config: VaultConfig) -> Result<()> {
    let registry = LocalRegistry::new();
    let manager = VaultManager::new(config, Arc::new(registry.clone()))?;
    let ready = manager.initialize().await;

    let path: Vec<String> = manager.history().iter().map(|s| format!("{s:?}")).collect();
    println!("State:     {}", path.join(" -> "));
    println!("Vault:     {}", manager.paths().vault_file().display());

    if ready {
        if let Some(id) = manager.identity_id() {
            println!("Identity:  {id}");
        }
        println!("Handlers:  {}", registry.channels().len());
    } else {
        println!(
            "Vault unavailable; the legacy store stays in use. See {}",
            manager.paths().migration_log().display()
        );
    }

    manager.cleanup();
    Ok(())
}

/// Initialize the vault for a one-shot command. Fails instead of falling back.
pub async fn open_ready(config: VaultConfig) -> Result<(VaultManager, LocalRegistry)> {
    let registry = LocalRegistry::new();
    let manager = VaultManager::new(config, Arc::new(registry.clone()))?;
    if !manager.initialize().await {
        bail!(
            "vault is unavailable (state {:?}); run `memvault doctor`",
            manager.state()
        );
    }
    Ok((manager, registry))
}
