//! Append-only JSON-lines record of migration attempts (`vault-migration.log`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use super::MigrationStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Success,
    Failure,
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub outcome: LogOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MigrationStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error cause chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    pub fn success(stats: MigrationStats, duration_ms: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            outcome: LogOutcome::Success,
            stats: Some(stats),
            error: None,
            stack: Vec::new(),
            duration_ms: Some(duration_ms),
        }
    }

    pub fn failure(err: &anyhow::Error, duration_ms: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            outcome: LogOutcome::Failure,
            stats: None,
            error: Some(format!("{err:#}")),
            stack: err.chain().map(|cause| cause.to_string()).collect(),
            duration_ms: Some(duration_ms),
        }
    }

    pub fn rollback(error: Option<&anyhow::Error>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            outcome: LogOutcome::Rollback,
            stats: None,
            error: error.map(|e| format!("{e:#}")),
            stack: error
                .map(|e| e.chain().map(|cause| cause.to_string()).collect())
                .unwrap_or_default(),
            duration_ms: None,
        }
    }
}

pub fn append_entry(path: &Path, entry: &LogEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open migration log {}", path.display()))?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// All entries in the log, oldest first. A missing log reads as empty.
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read migration log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("malformed migration log line"))
        .collect()
}
