//! Assemble what the assistant should know about the user before answering.
//!
//! Facts are ranked by decayed confidence; facts above the configured PII level or
//! below the confidence floor are left out. Preferences are listed separately.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::NoteKind;
use super::{facts, identity, notes, preferences};
use crate::config::ContextConfig;
use crate::crypto::ContentCipher;

/// A fact as presented to the assistant.
#[derive(Debug, Clone, Serialize)]
pub struct ContextFact {
    pub category: String,
    pub predicate: String,
    pub object: String,
    /// Confidence after decay.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultContext {
    pub display_name: String,
    pub facts: Vec<ContextFact>,
    pub preferences: BTreeMap<String, String>,
    pub recent_summaries: Vec<String>,
}

pub fn build_context(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    identity_id: &str,
    config: &ContextConfig,
    now: DateTime<Utc>,
) -> Result<VaultContext> {
    let Some(who) = identity::get_identity(conn, identity_id)? else {
        bail!("identity not found: {identity_id}");
    };

    let mut ranked: Vec<ContextFact> = facts::list_facts(conn, identity_id, None)?
        .into_iter()
        .filter(|f| f.category != preferences::PREFERENCE_CATEGORY)
        .filter(|f| f.pii_level <= config.max_pii_level)
        .map(|f| ContextFact {
            confidence: f.current_confidence(now),
            category: f.category,
            predicate: f.predicate,
            object: f.object,
        })
        .filter(|f| f.confidence >= config.min_confidence)
        .collect();

    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked.truncate(config.max_facts);

    let recent_summaries = notes::list_notes(
        conn,
        cipher,
        identity_id,
        Some(NoteKind::SessionSummary),
        config.recent_summaries,
    )?
    .into_iter()
    .map(|n| n.text)
    .collect();

    Ok(VaultContext {
        display_name: who.display_name,
        facts: ranked,
        preferences: preferences::list_preferences(conn, identity_id)?,
        recent_summaries,
    })
}

impl VaultContext {
    /// Plain-text rendering suitable for a system prompt.
    pub fn to_prompt(&self) -> String {
        let mut out = format!("User: {}\n", self.display_name);

        if !self.facts.is_empty() {
            out.push_str("\nKnown facts:\n");
            for f in &self.facts {
                out.push_str(&format!(
                    "- [{}] {} = {} ({:.2})\n",
                    f.category, f.predicate, f.object, f.confidence
                ));
            }
        }

        if !self.preferences.is_empty() {
            out.push_str("\nPreferences:\n");
            for (key, value) in &self.preferences {
                out.push_str(&format!("- {key}: {value}\n"));
            }
        }

        if !self.recent_summaries.is_empty() {
            out.push_str("\nRecent sessions:\n");
            for summary in &self.recent_summaries {
                out.push_str(&format!("- {summary}\n"));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::vault::facts::NewFact;

    #[test]
    fn context_ranks_and_filters_facts() {
        let vault = db::open_memory_vault(None).unwrap();
        let who = identity::ensure_identity(&vault.conn, "Ada").unwrap().id;

        facts::upsert_fact(&vault.conn, &who, &NewFact::new("personal", "lives_in", "Philadelphia").with_confidence(0.7)).unwrap();
        facts::upsert_fact(&vault.conn, &who, &NewFact::new("work", "role", "engineer").with_confidence(0.95)).unwrap();
        facts::upsert_fact(&vault.conn, &who, &NewFact::new("personal", "diagnosis", "x").with_pii_level(3)).unwrap();
        facts::upsert_fact(&vault.conn, &who, &NewFact::new("personal", "guess", "y").with_confidence(0.05)).unwrap();
        preferences::set_preference(&vault.conn, &who, "tone", "concise").unwrap();
        notes::add_note(&vault.conn, None, &who, NoteKind::SessionSummary, "Planned a trip", None).unwrap();

        let ctx = build_context(&vault.conn, None, &who, &ContextConfig::default(), Utc::now()).unwrap();

        assert_eq!(ctx.display_name, "Ada");
        let predicates: Vec<&str> = ctx.facts.iter().map(|f| f.predicate.as_str()).collect();
        assert_eq!(predicates, vec!["role", "lives_in"]);
        assert_eq!(ctx.preferences["tone"], "concise");
        assert_eq!(ctx.recent_summaries, vec!["Planned a trip".to_string()]);

        let prompt = ctx.to_prompt();
        assert!(prompt.contains("User: Ada"));
        assert!(prompt.contains("role = engineer"));
        assert!(!prompt.contains("diagnosis"));
    }

    #[test]
    fn unknown_identity_fails() {
        let vault = db::open_memory_vault(None).unwrap();
        assert!(build_context(&vault.conn, None, "ghost", &ContextConfig::default(), Utc::now()).is_err());
    }
}
