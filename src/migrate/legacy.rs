//! Strict schema for the legacy flat-JSON memory format.
//!
//! The legacy store kept four files under `memories/`. Each is optional; a file that is
//! present must parse completely against the types below or the whole migration fails.
//!
//! | File | Shape |
//! |------|-------|
//! | `profile.json` | object: `name?`, `id?`, other scalar keys become `personal` facts |
//! | `facts.json` | array of `{category?, predicate\|key, object\|value, confidence?, pii_level?, created_at?}` |
//! | `conversations.json` | array of `{id?, title?, goal?, started_at?, ended_at?, summary?, messages}` |
//! | `preferences.json` | object: key → any JSON value |
//!
//! Timestamps are RFC 3339 strings or integer epoch milliseconds.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::vault::types::Role;

/// A timestamp as the legacy app wrote it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyTimestamp {
    Millis(i64),
    Text(String),
}

impl LegacyTimestamp {
    pub fn to_utc(&self) -> Result<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| anyhow!("timestamp {ms} is out of range")),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("invalid RFC 3339 timestamp: {s}")),
        }
    }

    pub fn to_rfc3339(&self) -> Result<String> {
        Ok(self.to_utc()?.to_rfc3339())
    }
}

/// A scalar JSON value; objects and arrays are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyScalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl LegacyScalar {
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyProfile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Everything else; must be scalars (or null, which is skipped).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Option<LegacyScalar>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyFact {
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(alias = "key")]
    pub predicate: String,
    #[serde(alias = "value")]
    pub object: LegacyScalar,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub pii_level: Option<u8>,
    #[serde(default)]
    pub created_at: Option<LegacyTimestamp>,
}

fn default_category() -> String {
    "general".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, alias = "created_at")]
    pub timestamp: Option<LegacyTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyConversation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub started_at: Option<LegacyTimestamp>,
    #[serde(default)]
    pub ended_at: Option<LegacyTimestamp>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub messages: Vec<LegacyMessage>,
}

/// Everything read from a legacy `memories/` directory. Absent files read as empty.
#[derive(Debug, Clone, Default)]
pub struct LegacyData {
    pub profile: Option<LegacyProfile>,
    pub facts: Vec<LegacyFact>,
    pub conversations: Vec<LegacyConversation>,
    pub preferences: BTreeMap<String, serde_json::Value>,
}

impl LegacyData {
    /// Read and validate all legacy files in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            profile: read_json(&dir.join("profile.json"))?,
            facts: read_json(&dir.join("facts.json"))?.unwrap_or_default(),
            conversations: read_json(&dir.join("conversations.json"))?.unwrap_or_default(),
            preferences: read_json(&dir.join("preferences.json"))?.unwrap_or_default(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_none()
            && self.facts.is_empty()
            && self.conversations.is_empty()
            && self.preferences.is_empty()
    }
}

/// `Ok(None)` if the file does not exist; an error if it exists but does not parse.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read legacy file {}", path.display()))?;
    let parsed = serde_json::from_str(&contents)
        .with_context(|| format!("malformed legacy file {}", path.display()))?;
    Ok(Some(parsed))
}
