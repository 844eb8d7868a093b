// crates/sync-engine/src/types.rs
//! Core sync types and data structures

use crate::conflict::{Conflict, ConflictTracker};
use crate::error::SyncError;
use crate::queue::PendingQueue;
use mirrorsync_core::{timestamp, CollectionKey, Fields, LocalId, ServerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of work a pending change carries to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Record is unknown to the server
    Create,
    /// Record is known to the server and has field edits
    Update,
    /// Record was removed locally
    Remove,
}

impl ChangeAction {
    /// Order in which a cycle dispatches pending changes
    pub const DISPATCH_ORDER: [ChangeAction; 3] =
        [ChangeAction::Create, ChangeAction::Update, ChangeAction::Remove];

    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Remove => "remove",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coalesced outstanding work for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// What the server has to be told
    pub action: ChangeAction,
    /// Collection the record belongs to
    pub collection: CollectionKey,
    /// Local identity of the record
    pub local_id: LocalId,
    /// Server identity, once known
    #[serde(default)]
    pub server_id: Option<ServerId>,
    /// Bumped on every coalesced mutation
    pub version: u64,
    /// Accumulated field values to send
    #[serde(default)]
    pub changes: Fields,
    /// Value each changed field had before the first un-synced edit
    #[serde(default)]
    pub before: Fields,
    /// Set while the create for this entry awaits the server's answer
    #[serde(skip)]
    pub in_flight: bool,
}

impl PendingChange {
    /// Creates a first-version entry
    pub fn new(
        action: ChangeAction,
        collection: CollectionKey,
        local_id: LocalId,
        server_id: Option<ServerId>,
    ) -> Self {
        Self {
            action,
            collection,
            local_id,
            server_id,
            version: 1,
            changes: Fields::new(),
            before: Fields::new(),
            in_flight: false,
        }
    }

    /// Sets the field payload
    pub fn with_changes(mut self, changes: Fields) -> Self {
        self.changes = changes;
        self
    }

    /// Sets the pre-edit field values
    pub fn with_before(mut self, before: Fields) -> Self {
        self.before = before;
        self
    }

    /// Returns true if this entry is a removal
    pub fn is_remove(&self) -> bool {
        self.action == ChangeAction::Remove
    }

    /// Returns true for a create the server has never seen
    pub fn is_unsent_create(&self) -> bool {
        self.action == ChangeAction::Create && self.server_id.is_none() && !self.in_flight
    }
}

/// Coarse engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Scheduler stopped by the host
    Disabled,
    /// Persisted state not loaded yet
    #[default]
    Hydrating,
    /// A cycle is running
    Syncing,
    /// Ready and waiting for the next trigger
    Idle,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Disabled => write!(f, "disabled"),
            SyncStatus::Hydrating => write!(f, "hydrating"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Idle => write!(f, "idle"),
        }
    }
}

/// The error surfaced for the most recent cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleError {
    /// Collection the failure concerned, if any
    pub collection: Option<CollectionKey>,
    /// Rendered error
    pub message: String,
    /// When it was recorded
    pub occurred_at: Timestamp,
}

impl CycleError {
    /// Captures a sync error
    pub fn from_error(err: &SyncError) -> Self {
        Self {
            collection: err.collection().cloned(),
            message: err.to_string(),
            occurred_at: timestamp::now(),
        }
    }
}

/// Sync bookkeeping held next to the collections
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Engine status
    pub status: SyncStatus,
    /// Outstanding work, in insertion order
    pub pending: PendingQueue,
    /// Pull watermark per collection
    pub last_pulled: BTreeMap<CollectionKey, Timestamp>,
    /// Unresolved conflicts
    pub conflicts: ConflictTracker,
    /// Whether the initial full download completed
    pub first_load_done: bool,
    /// First error of the most recent cycle
    pub error: Option<CycleError>,
}

impl SyncState {
    /// Creates a state that is still hydrating
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pull watermark for a collection, epoch if never pulled
    pub fn watermark(&self, collection: &CollectionKey) -> Timestamp {
        self.last_pulled
            .get(collection)
            .copied()
            .unwrap_or_else(timestamp::epoch)
    }

    /// Moves a watermark forward; never moves it backward
    pub fn advance_watermark(&mut self, collection: &CollectionKey, seen: Timestamp) -> bool {
        match self.last_pulled.get_mut(collection) {
            Some(current) if *current >= seen => false,
            Some(current) => {
                *current = seen;
                true
            }
            None => {
                self.last_pulled.insert(collection.clone(), seen);
                true
            }
        }
    }

    /// Extracts the durable part of this state
    pub fn persisted(&self) -> PersistedSyncState {
        PersistedSyncState {
            first_load_done: self.first_load_done,
            pending_changes: self.pending.clone(),
            last_pulled: self.last_pulled.clone(),
            conflicts: self.conflicts.clone(),
        }
    }

    /// Restores the durable part of this state
    pub fn restore(&mut self, persisted: PersistedSyncState) {
        self.first_load_done = persisted.first_load_done;
        self.pending = persisted.pending_changes;
        self.last_pulled = persisted.last_pulled;
        self.conflicts = persisted.conflicts;
    }

    /// Builds the observable view of this state
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            status: self.status,
            last_error: self.error.clone(),
            last_pulled: self.last_pulled.clone(),
            pending_count: self.pending.len(),
            conflicts: self.conflicts.entries().clone(),
            first_load_done: self.first_load_done,
        }
    }
}

/// The part of the sync state that survives restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSyncState {
    /// Whether the initial full download completed
    pub first_load_done: bool,
    /// Outstanding work
    pub pending_changes: PendingQueue,
    /// Pull watermarks
    pub last_pulled: BTreeMap<CollectionKey, Timestamp>,
    /// Unresolved conflicts
    pub conflicts: ConflictTracker,
}

/// Read-only view of the sync state published to observers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    pub last_error: Option<CycleError>,
    pub last_pulled: BTreeMap<CollectionKey, Timestamp>,
    pub pending_count: usize,
    pub conflicts: BTreeMap<LocalId, Conflict>,
    pub first_load_done: bool,
}

impl SyncSnapshot {
    /// Returns true if a cycle is running
    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }

    /// Returns true if there are unresolved conflicts
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Outcome of one sync cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Remote records applied locally
    pub pulled: usize,
    /// Pending changes acknowledged by the server
    pub pushed: usize,
    /// Collections whose pull interval had not elapsed
    pub skipped_collections: Vec<CollectionKey>,
    /// Every failure of the cycle, in the order they occurred
    pub errors: Vec<SyncError>,
}

impl CycleReport {
    /// Returns true if every step succeeded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_order() {
        let mut actions = vec![ChangeAction::Remove, ChangeAction::Create, ChangeAction::Update];
        actions.sort();
        assert_eq!(actions, ChangeAction::DISPATCH_ORDER.to_vec());
    }

    #[test]
    fn test_new_state_is_hydrating() {
        let state = SyncState::new();
        assert_eq!(state.status, SyncStatus::Hydrating);
        assert!(!state.first_load_done);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_watermark_never_moves_backward() {
        let mut state = SyncState::new();
        let key = CollectionKey::from("todos");
        assert_eq!(state.watermark(&key), timestamp::epoch());

        assert!(state.advance_watermark(&key, timestamp::from_millis(2_000)));
        assert!(!state.advance_watermark(&key, timestamp::from_millis(1_000)));
        assert!(!state.advance_watermark(&key, timestamp::from_millis(2_000)));
        assert_eq!(state.watermark(&key), timestamp::from_millis(2_000));
    }

    #[test]
    fn test_persisted_roundtrip() {
        let mut state = SyncState::new();
        let key = CollectionKey::from("todos");
        state.first_load_done = true;
        state.advance_watermark(&key, timestamp::from_millis(42));

        let json = serde_json::to_string(&state.persisted()).unwrap();
        let restored: PersistedSyncState = serde_json::from_str(&json).unwrap();

        let mut fresh = SyncState::new();
        fresh.restore(restored);
        assert!(fresh.first_load_done);
        assert_eq!(fresh.watermark(&key), timestamp::from_millis(42));
    }

    #[test]
    fn test_cycle_error_keeps_collection() {
        let err = SyncError::collaborator(&CollectionKey::from("notes"), "list", "offline");
        let captured = CycleError::from_error(&err);
        assert_eq!(captured.collection, Some(CollectionKey::from("notes")));
        assert!(captured.message.contains("offline"));
    }
}
