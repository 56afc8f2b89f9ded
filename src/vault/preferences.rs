//! User preferences, stored as facts in the `preference` category.

use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeMap;

use super::facts::{self, NewFact};
use super::types::Fact;

pub const PREFERENCE_CATEGORY: &str = "preference";

pub fn set_preference(conn: &Connection, identity_id: &str, key: &str, value: &str) -> Result<Fact> {
    facts::upsert_fact(conn, identity_id, &NewFact::new(PREFERENCE_CATEGORY, key, value))
}

pub fn get_preference(conn: &Connection, identity_id: &str, key: &str) -> Result<Option<String>> {
    Ok(facts::get_fact(conn, identity_id, PREFERENCE_CATEGORY, key)?.map(|f| f.object))
}

pub fn list_preferences(conn: &Connection, identity_id: &str) -> Result<BTreeMap<String, String>> {
    Ok(facts::list_facts(conn, identity_id, Some(PREFERENCE_CATEGORY))?
        .into_iter()
        .map(|f| (f.predicate, f.object))
        .collect())
}
