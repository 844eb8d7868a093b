use super::*;
use crate::simulate::{simulate, SimulationOptions};
use mirrorsync_config::SyncConfig;
use mirrorsync_core::{timestamp, CollectionKey, LocalId, Record, ServerId};
use mirrorsync_engine::Store;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn manager(dir: &TempDir) -> ConfigManager {
    ConfigManager::with_directory(dir.path().to_path_buf()).unwrap()
}

#[test]
fn test_init_then_validate_config() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);

    init_config(&manager).unwrap();
    assert!(manager.config_path().exists());
    // second init leaves the file alone
    init_config(&manager).unwrap();
    validate_config(&manager).unwrap();
}

#[test]
fn test_validate_reports_invalid_config() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    std::fs::write(manager.config_path(), "[sync]\ninterval_secs = 0\n").unwrap();

    assert!(validate_config(&manager).is_err());
}

#[test]
fn test_show_status_without_snapshot() {
    let dir = TempDir::new().unwrap();
    show_status(&dir.path().join("missing.json")).unwrap();
}

/// A store holding one record the server already knows
fn synced_store(todos: &CollectionKey) -> (Store, LocalId) {
    let record = Record::from_value(json!({"name": "b"}))
        .unwrap()
        .with_server_id(ServerId::from(7u64));
    let id = record.local_id;
    let mut persisted = PersistedStore::default();
    persisted.collections.insert(todos.clone(), vec![record]);

    let store = Store::new();
    store.hydrate(persisted).unwrap();
    (store, id)
}

#[test]
fn test_status_lines_summarize_snapshot() {
    let todos = CollectionKey::from("todos");
    let (store, _) = synced_store(&todos);
    store
        .insert(&todos, Record::from_value(json!({"name": "a"})).unwrap())
        .unwrap();
    let mut persisted = store.persisted().unwrap();
    persisted
        .sync
        .last_pulled
        .insert(todos.clone(), timestamp::from_millis(0));

    let lines = status_lines(&persisted);
    assert_eq!(lines[0], "First load: pending");
    assert_eq!(
        lines[1],
        "todos: 2 record(s), 1 unsynced, last pulled 1970-01-01 00:00:00.000 UTC"
    );
    assert_eq!(lines[2], "Pending: 1 create, 0 update, 0 remove");
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_status_lines_empty_store() {
    let persisted = Store::hydrated().persisted().unwrap();
    let lines = status_lines(&persisted);
    assert_eq!(lines[1], "No collections");
}

#[test]
fn test_pending_removal_is_counted() {
    let todos = CollectionKey::from("todos");
    let (store, id) = synced_store(&todos);
    assert!(store.remove(&todos, &id).unwrap());

    let lines = status_lines(&store.persisted().unwrap());
    assert!(lines.contains(&"Pending: 0 create, 0 update, 1 remove".to_string()));
}

#[test]
fn test_truncate() {
    assert_eq!(truncate("12345678", 8), "12345678");
    assert_eq!(truncate("123456789", 8), "12345678...");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_small_simulation_converges() {
    let options = SimulationOptions {
        clients: 2,
        ops: 200,
        max_latency: Duration::from_millis(1),
        failure_rate: 0.2,
        seed: 42,
    };
    let summary = simulate(&SyncConfig::default(), &options).await.unwrap();
    assert!(summary.converged(), "diverged: {:?}", summary.diverged);
    assert!(summary.drain_rounds <= 10);
}

#[tokio::test]
async fn test_simulation_without_faults() {
    let options = SimulationOptions {
        clients: 1,
        ops: 100,
        max_latency: Duration::ZERO,
        failure_rate: 0.0,
        seed: 1,
    };
    let summary = simulate(&SyncConfig::default(), &options).await.unwrap();
    assert!(summary.converged());
    assert_eq!(summary.injected_failures, 0);
    assert_eq!(summary.resolved_conflicts, 0);
}
