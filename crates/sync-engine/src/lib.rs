// crates/sync-engine/src/lib.rs
//! Offline-first record synchronization
//!
//! Keeps a local copy of remote collections consistent with a server:
//! - Local mutations are diffed and coalesced into one pending change per record
//! - Cycles pull remote changes since a per-collection watermark, then push
//! - Conflicts are detected per field and kept until the host resolves them
//! - A paginated first load seeds empty local state
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mirrorsync_config::SyncConfig;
//! use mirrorsync_core::{CollectionKey, Record};
//! use mirrorsync_engine::{memory::MemoryBackend, Store, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryBackend::new());
//! let engine = SyncEngine::new(SyncConfig::default(), Arc::new(Store::hydrated()));
//! engine.register("todos", Arc::new(backend.collection("todos")))?;
//!
//! let todos = CollectionKey::from("todos");
//! engine
//!     .store()
//!     .insert(&todos, Record::from_value(serde_json::json!({"name": "milk"}))?)?;
//!
//! engine.sync_now().await?;
//! assert!(engine.pending_changes()?.is_empty());
//! # Ok(())
//! # }
//! ```

mod collaborator;
mod conflict;
mod diff;
mod engine;
mod error;
mod first_load;
mod lifecycle;
mod persist;
mod pull;
mod push;
mod queue;
mod scheduler;
mod store;
mod types;

pub mod memory;

pub use collaborator::{Capabilities, Collaborator};
pub use conflict::{detect_field_conflicts, Conflict, ConflictTracker, FieldConflict};
pub use diff::{diff_fields, diff_records, DiffEntry, RecordDiff};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use first_load::FirstLoadStats;
pub use lifecycle::{AlwaysForeground, HostLifecycle, ManualLifecycle, Visibility};
pub use persist::SnapshotFile;
pub use pull::MergeStats;
pub use push::MissingRemoteHook;
pub use queue::PendingQueue;
pub use store::{PersistedStore, Store, StoreState};
pub use types::{
    ChangeAction, CycleError, CycleReport, PendingChange, PersistedSyncState, SyncSnapshot,
    SyncState, SyncStatus,
};
