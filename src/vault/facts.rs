//! Fact store with last-write-wins belief updates.
//!
//! `facts` carries `UNIQUE(identity_id, category, predicate) ON CONFLICT REPLACE`, so
//! [`upsert_fact`] replaces the prior row for the same key instead of appending. The
//! prior row's id, confidence, and provenance are discarded, not merged.
//!
//! Confidence decays exponentially from `last_reinforced_at` with the fact's half-life;
//! see [`decayed_confidence`].

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::types::{parse_column, ConsentScope, Fact};

/// Default half-life for fact confidence, in days.
pub const DEFAULT_HALFLIFE_DAYS: f64 = 90.0;

const FACT_COLUMNS: &str = "id, identity_id, category, predicate, object, confidence, pii_level, \
     consent_scope, source_message_id, created_at, updated_at, last_reinforced_at, decay_halflife_days";

/// Input for [`upsert_fact`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFact {
    pub category: String,
    pub predicate: String,
    pub object: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub pii_level: u8,
    #[serde(default)]
    pub consent_scope: ConsentScope,
    #[serde(default)]
    pub source_message_id: Option<String>,
    #[serde(default = "default_halflife")]
    pub decay_halflife_days: f64,
    /// Creation time override (legacy import); defaults to now.
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_halflife() -> f64 {
    DEFAULT_HALFLIFE_DAYS
}

impl NewFact {
    pub fn new(category: &str, predicate: &str, object: &str) -> Self {
        Self {
            category: category.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence: default_confidence(),
            pii_level: 0,
            consent_scope: ConsentScope::Default,
            source_message_id: None,
            decay_halflife_days: DEFAULT_HALFLIFE_DAYS,
            created_at: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_pii_level(mut self, pii_level: u8) -> Self {
        self.pii_level = pii_level;
        self
    }
}

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<Fact> {
    let pii_level: i64 = row.get(6)?;
    Ok(Fact {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        category: row.get(2)?,
        predicate: row.get(3)?,
        object: row.get(4)?,
        confidence: row.get(5)?,
        pii_level: pii_level.clamp(0, 3) as u8,
        consent_scope: parse_column(row.get(7)?, 7)?,
        source_message_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        last_reinforced_at: row.get(11)?,
        decay_halflife_days: row.get(12)?,
    })
}

/// Insert a fact, replacing any existing fact with the same (identity, category, predicate).
///
/// Range violations (confidence outside `[0, 1]`, pii_level above 3) are rejected by the
/// schema's CHECK constraints; nothing is written in that case.
pub fn upsert_fact(conn: &Connection, identity_id: &str, fact: &NewFact) -> Result<Fact> {
    if fact.category.is_empty() || fact.predicate.is_empty() {
        bail!("fact category and predicate must not be empty");
    }

    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let created_at = fact.created_at.clone().unwrap_or_else(|| now.clone());

    conn.execute(
        &format!(
            "INSERT INTO facts ({FACT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            id,
            identity_id,
            fact.category,
            fact.predicate,
            fact.object,
            fact.confidence,
            fact.pii_level as i64,
            fact.consent_scope.as_str(),
            fact.source_message_id,
            created_at,
            now,
            now,
            fact.decay_halflife_days,
        ],
    )?;

    tracing::debug!(
        identity = %identity_id,
        category = %fact.category,
        predicate = %fact.predicate,
        "fact stored"
    );

    Ok(Fact {
        id,
        identity_id: identity_id.to_string(),
        category: fact.category.clone(),
        predicate: fact.predicate.clone(),
        object: fact.object.clone(),
        confidence: fact.confidence,
        pii_level: fact.pii_level,
        consent_scope: fact.consent_scope,
        source_message_id: fact.source_message_id.clone(),
        created_at,
        updated_at: now.clone(),
        last_reinforced_at: now,
        decay_halflife_days: fact.decay_halflife_days,
    })
}

/// Look up the current belief for (identity, category, predicate).
pub fn get_fact(
    conn: &Connection,
    identity_id: &str,
    category: &str,
    predicate: &str,
) -> Result<Option<Fact>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {FACT_COLUMNS} FROM facts \
                 WHERE identity_id = ?1 AND category = ?2 AND predicate = ?3"
            ),
            params![identity_id, category, predicate],
            row_to_fact,
        )
        .optional()?)
}

/// All facts for an identity, optionally restricted to one category.
pub fn list_facts(
    conn: &Connection,
    identity_id: &str,
    category: Option<&str>,
) -> Result<Vec<Fact>> {
    let facts = match category {
        Some(category) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE identity_id = ?1 AND category = ?2 \
                 ORDER BY category, predicate"
            ))?;
            let rows = stmt
                .query_map(params![identity_id, category], row_to_fact)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE identity_id = ?1 \
                 ORDER BY category, predicate"
            ))?;
            let rows = stmt
                .query_map(params![identity_id], row_to_fact)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(facts)
}

/// Remove a belief. Returns `false` if no such fact existed.
pub fn delete_fact(
    conn: &Connection,
    identity_id: &str,
    category: &str,
    predicate: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM facts WHERE identity_id = ?1 AND category = ?2 AND predicate = ?3",
        params![identity_id, category, predicate],
    )?;
    Ok(rows > 0)
}

/// Restart the decay clock for a fact that was observed again.
pub fn reinforce_fact(conn: &Connection, fact_id: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE facts SET last_reinforced_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![now, fact_id],
    )?;
    if rows == 0 {
        bail!("fact not found: {fact_id}");
    }
    Ok(())
}

/// `confidence * 0.5^(age_days / halflife_days)`, with age measured from the last
/// reinforcement and clamped at zero.
pub fn decayed_confidence(
    confidence: f64,
    halflife_days: f64,
    last_reinforced_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    if halflife_days <= 0.0 {
        return confidence;
    }
    let age_days = ((now - last_reinforced_at).num_seconds() as f64 / 86_400.0).max(0.0);
    confidence * 0.5_f64.powf(age_days / halflife_days)
}

impl Fact {
    /// Confidence after decay at `now`. Unparseable timestamps leave confidence undecayed.
    pub fn current_confidence(&self, now: DateTime<Utc>) -> f64 {
        match DateTime::parse_from_rfc3339(&self.last_reinforced_at) {
            Ok(reinforced) => decayed_confidence(
                self.confidence,
                self.decay_halflife_days,
                reinforced.with_timezone(&Utc),
                now,
            ),
            Err(_) => self.confidence,
        }
    }
}
