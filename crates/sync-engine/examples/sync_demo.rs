// crates/sync-engine/examples/sync_demo.rs
//! Demonstration of sync engine capabilities

use mirrorsync_config::SyncConfig;
use mirrorsync_core::{CollectionKey, Record};
use mirrorsync_engine::memory::MemoryBackend;
use mirrorsync_engine::{Store, SyncEngine, SyncResult};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Mirrorsync Engine Demo");
    println!("======================\n");

    let backend = Arc::new(MemoryBackend::new());
    demo_basic_sync(&backend).await?;
    println!();
    demo_conflict_resolution(&backend).await?;
    Ok(())
}

fn client(backend: &Arc<MemoryBackend>) -> SyncResult<SyncEngine> {
    let engine = SyncEngine::new(SyncConfig::default(), Arc::new(Store::hydrated()));
    engine.register("notes", Arc::new(backend.collection("notes")))?;
    Ok(engine)
}

async fn demo_basic_sync(backend: &Arc<MemoryBackend>) -> Result<(), Box<dyn std::error::Error>> {
    println!("1. Basic Synchronization");
    println!("------------------------");

    let notes = CollectionKey::from("notes");
    let engine = client(backend)?;

    println!("Recording changes offline:");
    let id = engine
        .store()
        .insert(&notes, Record::from_value(json!({"title": "Groceries"}))?)?;
    println!("  ✓ Created note");
    engine.store().modify(&notes, &id, |fields| {
        fields.insert("body".into(), json!("milk, eggs"));
    })?;
    println!("  ✓ Edited note");

    let pending = engine.pending_changes()?;
    println!(
        "\nPending changes: {} ({} v{})",
        pending.len(),
        pending[0].action,
        pending[0].version
    );

    let report = engine.sync_now().await?.unwrap_or_default();
    println!("Synced: {} pushed, {} pulled", report.pushed, report.pulled);

    let record = engine.store().record(&notes, &id)?;
    if let Some(server_id) = record.and_then(|r| r.server_id) {
        println!("Server assigned id {}", server_id);
    }
    Ok(())
}

async fn demo_conflict_resolution(
    backend: &Arc<MemoryBackend>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("2. Conflict Resolution");
    println!("----------------------");

    let notes = CollectionKey::from("notes");
    let laptop = client(backend)?;
    let phone = client(backend)?;
    laptop.sync_now().await?;
    phone.sync_now().await?;

    let on_laptop = laptop.store().records(&notes)?.remove(0);
    let on_phone = phone.store().records(&notes)?.remove(0);

    laptop.store().modify(&notes, &on_laptop.local_id, |f| {
        f.insert("title".into(), json!("Groceries (laptop)"));
    })?;
    phone.store().modify(&notes, &on_phone.local_id, |f| {
        f.insert("title".into(), json!("Groceries (phone)"));
    })?;
    println!("Both devices renamed the note");

    phone.sync_now().await?;
    laptop.sync_now().await?;

    let state = laptop.state()?;
    for conflict in state.conflicts.values() {
        for field in &conflict.fields {
            println!(
                "  ⚠ '{}' conflicts: local {} vs remote {}",
                field.field, field.local, field.remote
            );
        }
    }

    laptop.resolve_conflict(on_laptop.local_id, true)?;
    laptop.sync_now().await?;
    phone.sync_now().await?;
    println!("Kept the laptop's title");

    let final_title = phone
        .store()
        .record(&notes, &on_phone.local_id)?
        .and_then(|r| r.get("title").cloned());
    println!("Phone now shows: {}", final_title.unwrap_or_default());
    Ok(())
}
