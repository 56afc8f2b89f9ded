//! CLI `fact` commands. Requests go through the same handlers the UI uses.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use memvault::config::VaultConfig;
use memvault::handlers::{LocalRegistry, GET_FACT, LIST_FACTS, SET_FACT};

async fn call(registry: &LocalRegistry, channel: &str, payload: Value) -> Result<Value> {
    registry.invoke(channel, payload).await.map_err(|e| anyhow!(e))
}

pub async fn get(config: VaultConfig, category: &str, predicate: &str) -> Result<()> {
    let (manager, registry) = super::open_ready(config).await?;
    let result = call(
        &registry,
        GET_FACT,
        json!({ "category": category, "predicate": predicate }),
    )
    .await;
    manager.cleanup();

    match result? {
        Value::Null => println!("(no fact for {category}/{predicate})"),
        fact => print_fact(&fact),
    }
    Ok(())
}

pub async fn set(
    config: VaultConfig,
    category: &str,
    predicate: &str,
    object: &str,
    confidence: f64,
    pii_level: u8,
) -> Result<()> {
    let (manager, registry) = super::open_ready(config).await?;
    let result = call(
        &registry,
        SET_FACT,
        json!({
            "category": category,
            "predicate": predicate,
            "object": object,
            "confidence": confidence,
            "pii_level": pii_level,
        }),
    )
    .await;
    manager.cleanup();

    print_fact(&result?);
    Ok(())
}

pub async fn list(config: VaultConfig, category: Option<&str>) -> Result<()> {
    let (manager, registry) = super::open_ready(config).await?;
    let result = call(&registry, LIST_FACTS, json!({ "category": category })).await;
    manager.cleanup();

    let facts = result?;
    let facts = facts.as_array().map(Vec::as_slice).unwrap_or_default();
    if facts.is_empty() {
        println!("No facts stored.");
    }
    for fact in facts {
        print_fact(fact);
    }
    Ok(())
}

fn print_fact(fact: &Value) {
    println!(
        "[{}] {} = {}  (confidence {:.2}, pii {})",
        fact["category"].as_str().unwrap_or("?"),
        fact["predicate"].as_str().unwrap_or("?"),
        fact["object"].as_str().unwrap_or("?"),
        fact["confidence"].as_f64().unwrap_or(0.0),
        fact["pii_level"].as_u64().unwrap_or(0),
    );
}
