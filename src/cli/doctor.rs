//! CLI `doctor` command: print a vault health report.

use anyhow::{Context, Result};

use memvault::config::VaultConfig;
use memvault::db;
use memvault::migrate::{self, log};

/// Run vault diagnostics and print a health report.
pub fn doctor(config: &VaultConfig) -> Result<()> {
    let paths = config.paths();
    let vault_path = paths.vault_file();

    println!("Memvault Health Report");
    println!("======================");
    println!();
    println!("App data:          {}", paths.app_data_dir().display());

    let legacy = paths.existing_legacy_files();
    println!("Legacy files:      {}", legacy.len());
    for file in &legacy {
        println!("  {}", file.display());
    }
    println!(
        "Legacy backup:     {}",
        if paths.backup_dir().is_dir() { "present" } else { "none" }
    );
    println!(
        "Migration needed:  {}",
        if migrate::migration_needed(&paths) { "yes" } else { "no" }
    );

    if let Some(last) = log::read_entries(&paths.migration_log())?.last() {
        println!(
            "Last migration:    {:?} at {}",
            last.outcome, last.timestamp
        );
        if let Some(ref error) = last.error {
            println!("  Error:           {error}");
        }
    }
    println!();

    if !vault_path.exists() {
        println!("Vault: not found at {}", vault_path.display());
        println!("Run `memvault init` to create or migrate it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&vault_path).map(|m| m.len()).unwrap_or(0);
    let vault = db::open_vault(&vault_path, config.cipher()?.as_ref())
        .context("failed to open vault (may be corrupt or the key may be wrong)")?;
    let report = db::check_vault_health(&vault.conn).context("failed to run health check")?;

    println!("Vault:             {}", vault_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("Encryption:        {}", report.encryption);
    println!(
        "Migrated:          {}",
        match (report.migration_complete, report.migrated_at.as_deref()) {
            (true, Some(at)) => format!("yes ({at})"),
            (true, None) => "yes".to_string(),
            (false, _) => "no (fresh vault)".to_string(),
        }
    );
    println!();
    println!("Row counts:");
    println!("  Identities:      {}", report.stats.identities);
    println!("  Sessions:        {}", report.stats.sessions);
    println!("  Messages:        {}", report.stats.messages);
    println!("  Facts:           {}", report.stats.facts);
    println!("  Notes:           {}", report.stats.notes);
    println!("  Embeddings:      {}", report.stats.embeddings);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore the vault file from a backup, or");
        println!("  2. If it was migrated, `memvault rollback --yes` and `memvault init` again.");
    }

    vault.close()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
