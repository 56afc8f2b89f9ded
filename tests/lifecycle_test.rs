mod helpers;

use memvault::db::{self, meta};
use memvault::handlers::{LocalRegistry, GET_FACT, LIST_FACTS, SET_FACT, STATUS};
use memvault::lifecycle::{VaultManager, VaultState};
use memvault::migrate::MigrationEvent;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn manager_in(tmp: &TempDir) -> (VaultManager, LocalRegistry) {
    let registry = LocalRegistry::new();
    let manager = VaultManager::new(helpers::config_in(tmp), Arc::new(registry.clone())).unwrap();
    (manager, registry)
}

#[tokio::test]
async fn fresh_install_serves_facts() {
    let tmp = TempDir::new().unwrap();
    let (manager, registry) = manager_in(&tmp);

    assert!(manager.initialize().await);
    assert_eq!(manager.state(), VaultState::Ready);

    let status = registry.invoke(STATUS, json!(null)).await.unwrap();
    assert_eq!(status["schema_version"], "1.0");
    assert_eq!(status["migration_complete"], false);

    let stored = registry
        .invoke(
            SET_FACT,
            json!({"category": "personal", "predicate": "name", "object": "Ada", "confidence": 1.0, "pii_level": 1}),
        )
        .await
        .unwrap();
    let fetched = registry
        .invoke(GET_FACT, json!({"category": "personal", "predicate": "name"}))
        .await
        .unwrap();
    assert_eq!(fetched, stored);
    assert_eq!(fetched["object"], "Ada");
    assert_eq!(fetched["pii_level"], 1);

    manager.cleanup();
    let vault = db::open_vault(manager.paths().vault_file(), None).unwrap();
    assert_eq!(
        meta::get_meta(&vault.conn, meta::MIGRATION_COMPLETE).unwrap().as_deref(),
        Some("0")
    );
}

#[tokio::test]
async fn legacy_install_migrates_then_serves() {
    let tmp = TempDir::new().unwrap();
    let paths = helpers::paths_in(&tmp);
    helpers::write_legacy(&paths, "profile.json", r#"{"name": "Ada", "city": "London"}"#);
    let (manager, registry) = manager_in(&tmp);
    let mut events = manager.subscribe_migration();

    assert!(manager.initialize().await);
    assert_eq!(
        manager.history(),
        [VaultState::Uninitialized, VaultState::Migrating, VaultState::Ready]
    );
    assert_eq!(events.try_recv().unwrap(), MigrationEvent::Started);
    assert!(matches!(events.try_recv().unwrap(), MigrationEvent::Completed(_)));

    let facts = registry.invoke(LIST_FACTS, json!({"category": "personal"})).await.unwrap();
    assert_eq!(facts[0]["predicate"], "city");
    assert_eq!(facts[0]["object"], "London");

    let status = registry.invoke(STATUS, json!({})).await.unwrap();
    assert_eq!(status["migration_complete"], true);
}

#[tokio::test]
async fn malformed_legacy_data_falls_back() {
    let tmp = TempDir::new().unwrap();
    let paths = helpers::paths_in(&tmp);
    helpers::write_legacy(&paths, "facts.json", "{not json");
    let (manager, registry) = manager_in(&tmp);

    assert!(!manager.initialize().await);
    assert_eq!(
        manager.history(),
        [VaultState::Uninitialized, VaultState::Migrating, VaultState::FallbackLegacy]
    );
    assert!(registry.channels().is_empty());
    assert!(helpers::vault_artifacts_in(tmp.path()).is_empty());
    assert!(paths.legacy_dir().join("facts.json").is_file());
}

#[tokio::test]
async fn existing_vault_is_loaded() {
    let tmp = TempDir::new().unwrap();

    let (first, registry) = manager_in(&tmp);
    assert!(first.initialize().await);
    registry
        .invoke(SET_FACT, json!({"category": "work", "predicate": "role", "object": "engineer"}))
        .await
        .unwrap();
    let identity = first.identity_id();
    first.cleanup();

    let (second, registry) = manager_in(&tmp);
    assert!(second.initialize().await);
    assert_eq!(
        second.history(),
        [VaultState::Uninitialized, VaultState::Loading, VaultState::Ready]
    );
    assert_eq!(second.identity_id(), identity);

    let fact = registry
        .invoke(GET_FACT, json!({"category": "work", "predicate": "role"}))
        .await
        .unwrap();
    assert_eq!(fact["object"], "engineer");
}

#[tokio::test]
async fn corrupt_vault_falls_back() {
    let tmp = TempDir::new().unwrap();
    let paths = helpers::paths_in(&tmp);
    std::fs::write(paths.vault_file(), vec![0xA5u8; 4096]).unwrap();
    let (manager, registry) = manager_in(&tmp);

    assert!(!manager.initialize().await);
    assert_eq!(manager.state(), VaultState::FallbackLegacy);
    assert!(!registry.is_registered(STATUS));
    assert!(registry.invoke(STATUS, json!({})).await.is_err());
}

#[tokio::test]
async fn state_watchers_see_ready() {
    let tmp = TempDir::new().unwrap();
    let (manager, _) = manager_in(&tmp);
    let manager = Arc::new(manager);
    let mut rx = manager.subscribe_state();

    let init = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.initialize().await }
    });

    rx.wait_for(|state| *state == VaultState::Ready).await.unwrap();
    assert!(init.await.unwrap());
    assert!(manager.is_ready());
}

#[tokio::test]
async fn concurrent_initialize_runs_once() {
    let tmp = TempDir::new().unwrap();
    let (manager, _) = manager_in(&tmp);

    let (a, b) = tokio::join!(manager.initialize(), manager.initialize());
    assert!(a && b);
    assert_eq!(
        manager.history(),
        [VaultState::Uninitialized, VaultState::FreshInit, VaultState::Ready]
    );
}
