//! CLI `rollback` command: undo a completed migration after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use memvault::config::VaultConfig;
use memvault::migrate::MigrationEngine;

/// Restore legacy files from `memories-backup/` and delete the vault.
pub fn rollback(config: &VaultConfig, yes: bool) -> Result<()> {
    let paths = config.paths();

    if !yes {
        println!("WARNING: This deletes the vault and restores the legacy memory files.");
        println!("Anything written to the vault since migration will be lost.");
        println!("Vault: {}", paths.vault_file().display());
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("rollback cancelled");
        }
    }

    let engine = MigrationEngine::new(paths, config.cipher()?, &config.storage.display_name);
    let report = engine.rollback()?;

    println!("Restored: {}", report.restored_files.join(", "));
    if report.vault_removed {
        println!("Vault deleted. The next `memvault init` will migrate again.");
    } else {
        println!("No vault file was present.");
    }
    Ok(())
}
