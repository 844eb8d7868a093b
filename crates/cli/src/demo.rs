// FILE: crates/cli/src/demo.rs
//! Walks a single record through its whole sync lifecycle

use anyhow::{anyhow, Context, Result};
use console::style;
use mirrorsync_config::Config;
use mirrorsync_core::{fields_from_value, CollectionKey, Record, ServerId};
use mirrorsync_engine::memory::MemoryBackend;
use mirrorsync_engine::{SnapshotFile, Store, SyncEngine};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const COLLECTION: &str = "todos";

/// Runs the create, update and remove walkthrough
///
/// Writes the final local state to `state_path` when one is given.
pub async fn run(config: &Config, state_path: Option<&Path>) -> Result<()> {
    let todos = CollectionKey::from(COLLECTION);
    let backend = Arc::new(MemoryBackend::new());
    let engine = SyncEngine::new(config.sync.clone(), Arc::new(Store::hydrated()));
    engine
        .register(todos.clone(), Arc::new(backend.collection(todos.clone())))
        .context("Failed to register collection")?;
    engine.on_missing_remote(|collection, record| {
        log::warn!("{} vanished from '{}'", record.local_id, collection);
    })?;
    engine.start().context("Failed to start sync engine")?;

    println!("\n{}", style("Mirrorsync Demo").bold().cyan());
    println!("{}", "=".repeat(60));

    step(1, "Create a record while offline");
    let local_id = engine
        .store()
        .insert(&todos, Record::from_value(json!({"name": "buy milk", "done": false}))?)?;
    println!("  Local id: {}", local_id);
    println!("  Pending changes: {}", engine.pending_changes()?.len());

    engine.sync_now().await?;
    let record = engine
        .store()
        .record(&todos, &local_id)?
        .ok_or_else(|| anyhow!("record {} disappeared", local_id))?;
    let server_id = record
        .server_id
        .clone()
        .ok_or_else(|| anyhow!("server did not assign an id"))?;
    let created_at = record.updated_at;
    println!("  {} Server assigned id {}", style("✓").green().bold(), server_id);

    step(2, "Mark it done");
    engine.store().modify(&todos, &local_id, |fields| {
        fields.insert("done".into(), json!(true));
    })?;
    engine.sync_now().await?;
    print_row(&backend, &todos, &server_id)?;
    if let (Some(before), Some(row)) = (created_at, backend.row(&todos, &server_id)?) {
        println!("  updated_at advanced: {}", row.updated_at > before);
    }

    step(3, "Another client renames it");
    let renamed = fields_from_value(json!({"name": "buy oat milk"}))?;
    backend.update_row(&todos, &server_id, renamed)?;
    engine.sync_now().await?;
    if let Some(record) = engine.store().record(&todos, &local_id)? {
        println!("  Local name is now {}", record.get("name").cloned().unwrap_or_default());
    }

    step(4, "Remove it");
    engine.store().remove(&todos, &local_id)?;
    engine.sync_now().await?;
    print_row(&backend, &todos, &server_id)?;
    println!("  Local records: {}", engine.store().records(&todos)?.len());
    println!("  Pending changes: {}", engine.pending_changes()?.len());

    println!("\nScheduler running: {}", engine.is_enabled());
    engine.enable(false)?;
    let state = engine.state()?;
    println!("Status: {}", state.status);
    if let Some(error) = &state.last_error {
        println!("Last error: {}", style(&error.message).red());
    }

    if let Some(path) = state_path {
        SnapshotFile::new(path)
            .save_store(engine.store())
            .with_context(|| format!("Failed to save state to {}", path.display()))?;
        println!("State saved to {}", path.display());
    }
    Ok(())
}

fn step(n: usize, title: &str) {
    println!("\n{} {}", style(format!("{}.", n)).bold(), style(title).bold());
}

fn print_row(backend: &MemoryBackend, collection: &CollectionKey, id: &ServerId) -> Result<()> {
    match backend.row(collection, id)? {
        Some(row) => println!(
            "  Server row {}: {} (deleted: {})",
            row.id,
            serde_json::Value::Object(row.fields),
            row.deleted
        ),
        None => println!("  Server row {} is gone", id),
    }
    Ok(())
}
