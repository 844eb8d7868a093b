// crates/sync-engine/src/store.rs
//! Local record store with change capture
//!
//! Host mutations go through [`Store::update`] (or one of its shortcuts).
//! Each mutation is diffed against the previous snapshot of the collection
//! and folded into the pending queue under the same lock, so the records
//! and the queue never disagree. Observers get a fresh [`SyncSnapshot`]
//! after every change.

use crate::diff::diff_records;
use crate::error::{SyncError, SyncResult};
use crate::types::{PendingChange, PersistedSyncState, SyncSnapshot, SyncState, SyncStatus};
use mirrorsync_core::{CollectionKey, Fields, LocalId, Record, ServerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Records and sync bookkeeping guarded together
#[derive(Debug, Default)]
pub struct StoreState {
    pub(crate) collections: BTreeMap<CollectionKey, Vec<Record>>,
    pub(crate) sync: SyncState,
}

impl StoreState {
    /// Records of a collection
    pub fn records(&self, collection: &CollectionKey) -> &[Record] {
        self.collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sync bookkeeping
    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    /// Finds a record by local identity
    pub fn find(&self, collection: &CollectionKey, local_id: &LocalId) -> Option<&Record> {
        self.records(collection)
            .iter()
            .find(|r| &r.local_id == local_id)
    }

    pub(crate) fn records_mut(&mut self, collection: &CollectionKey) -> &mut Vec<Record> {
        self.collections.entry(collection.clone()).or_default()
    }

    pub(crate) fn find_mut(
        &mut self,
        collection: &CollectionKey,
        local_id: &LocalId,
    ) -> Option<&mut Record> {
        self.collections
            .get_mut(collection)?
            .iter_mut()
            .find(|r| &r.local_id == local_id)
    }

    pub(crate) fn remove_record(
        &mut self,
        collection: &CollectionKey,
        local_id: &LocalId,
    ) -> Option<Record> {
        let records = self.collections.get_mut(collection)?;
        let index = records.iter().position(|r| &r.local_id == local_id)?;
        Some(records.remove(index))
    }

    pub(crate) fn remove_by_server_id(
        &mut self,
        collection: &CollectionKey,
        server_id: &ServerId,
    ) -> Option<Record> {
        let records = self.collections.get_mut(collection)?;
        let index = records
            .iter()
            .position(|r| r.server_id.as_ref() == Some(server_id))?;
        Some(records.remove(index))
    }
}

/// Everything the store writes to durable storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedStore {
    pub collections: BTreeMap<CollectionKey, Vec<Record>>,
    pub sync: PersistedSyncState,
}

/// Shared local state: collections plus the sync bookkeeping
pub struct Store {
    state: Mutex<StoreState>,
    updates: watch::Sender<SyncSnapshot>,
}

impl Store {
    /// Creates an empty store that still has to be hydrated
    pub fn new() -> Self {
        let state = StoreState::default();
        let (updates, _) = watch::channel(state.sync.snapshot());
        Self {
            state: Mutex::new(state),
            updates,
        }
    }

    /// Creates an empty store with nothing to hydrate
    pub fn hydrated() -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.sync.status = SyncStatus::Idle;
            store.updates.send_replace(state.sync.snapshot());
        }
        store
    }

    /// Loads persisted state and marks the store ready
    pub fn hydrate(&self, persisted: PersistedStore) -> SyncResult<()> {
        self.transact(|state| {
            state.collections = persisted.collections;
            state.sync.restore(persisted.sync);
            if state.sync.status == SyncStatus::Hydrating {
                state.sync.status = SyncStatus::Idle;
            }
            log::info!(
                "Hydrated {} collection(s), {} pending change(s)",
                state.collections.len(),
                state.sync.pending.len()
            );
        })
    }

    /// Returns the state to persist
    pub fn persisted(&self) -> SyncResult<PersistedStore> {
        self.read(|state| PersistedStore {
            collections: state.collections.clone(),
            sync: state.sync.persisted(),
        })
    }

    /// Clones the records of a collection
    pub fn records(&self, collection: &CollectionKey) -> SyncResult<Vec<Record>> {
        self.read(|state| state.records(collection).to_vec())
    }

    /// Clones one record
    pub fn record(
        &self,
        collection: &CollectionKey,
        local_id: &LocalId,
    ) -> SyncResult<Option<Record>> {
        self.read(|state| state.find(collection, local_id).cloned())
    }

    /// Clones the pending queue
    pub fn pending_changes(&self) -> SyncResult<Vec<PendingChange>> {
        self.read(|state| state.sync.pending.iter().cloned().collect())
    }

    /// Returns the current observable state
    pub fn snapshot(&self) -> SyncResult<SyncSnapshot> {
        self.read(|state| state.sync.snapshot())
    }

    /// Subscribes to state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.updates.subscribe()
    }

    /// Mutates a collection and records the resulting changes
    ///
    /// The closure sees the full record list. If the mutation cannot be
    /// queued (a record re-added while its removal is pending) the
    /// collection is rolled back and the error returned.
    pub fn update<F, R>(&self, collection: &CollectionKey, mutate: F) -> SyncResult<R>
    where
        F: FnOnce(&mut Vec<Record>) -> R,
    {
        let mut state = self.lock()?;
        if state.sync.status == SyncStatus::Hydrating {
            return Err(SyncError::NotReady);
        }

        let records = state.records_mut(collection);
        let previous = records.clone();
        let output = mutate(records);
        let diffs = diff_records(&previous, records);
        if diffs.is_empty() {
            return Ok(output);
        }

        let mut pending = state.sync.pending.clone();
        for entry in diffs {
            if let Err(e) = pending.record_change(collection, entry) {
                state.collections.insert(collection.clone(), previous);
                return Err(e);
            }
        }
        state.sync.pending = pending;

        self.publish(&state);
        Ok(output)
    }

    /// Appends a record
    pub fn insert(&self, collection: &CollectionKey, record: Record) -> SyncResult<LocalId> {
        let local_id = record.local_id;
        self.update(collection, move |records| records.push(record))?;
        Ok(local_id)
    }

    /// Edits the fields of one record
    pub fn modify<F>(&self, collection: &CollectionKey, local_id: &LocalId, edit: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Fields),
    {
        let found = self.update(collection, |records| {
            match records.iter_mut().find(|r| &r.local_id == local_id) {
                Some(record) => {
                    edit(&mut record.fields);
                    true
                }
                None => false,
            }
        })?;

        if found {
            Ok(())
        } else {
            Err(SyncError::UnknownRecord {
                collection: collection.clone(),
                local_id: *local_id,
            })
        }
    }

    /// Removes one record; returns false if it did not exist
    pub fn remove(&self, collection: &CollectionKey, local_id: &LocalId) -> SyncResult<bool> {
        self.update(collection, |records| {
            let before = records.len();
            records.retain(|r| &r.local_id != local_id);
            records.len() != before
        })
    }

    pub(crate) fn read<F, R>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&StoreState) -> R,
    {
        let state = self.lock()?;
        Ok(f(&state))
    }

    /// Applies an engine-side change and publishes the result
    pub(crate) fn transact<F, R>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut StoreState) -> R,
    {
        let mut state = self.lock()?;
        let output = f(&mut state);
        self.publish(&state);
        Ok(output)
    }

    pub(crate) fn try_transact<F, R>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut StoreState) -> SyncResult<R>,
    {
        self.transact(f)?
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| SyncError::LockPoisoned)
    }

    fn publish(&self, state: &StoreState) {
        self.updates.send_replace(state.sync.snapshot());
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeAction;
    use serde_json::json;

    fn todos() -> CollectionKey {
        CollectionKey::from("todos")
    }

    #[test]
    fn test_mutation_while_hydrating_is_rejected() {
        let store = Store::new();
        let result = store.insert(&todos(), Record::default());
        assert!(matches!(result, Err(SyncError::NotReady)));
    }

    #[test]
    fn test_hydrate_sets_idle() {
        let store = Store::new();
        assert_eq!(store.snapshot().unwrap().status, SyncStatus::Hydrating);
        store.hydrate(PersistedStore::default()).unwrap();
        assert_eq!(store.snapshot().unwrap().status, SyncStatus::Idle);
    }

    #[test]
    fn test_insert_queues_create() {
        let store = Store::hydrated();
        let id = store
            .insert(&todos(), Record::from_value(json!({"name": "milk"})).unwrap())
            .unwrap();

        let pending = store.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, ChangeAction::Create);
        assert_eq!(pending[0].local_id, id);
        assert_eq!(store.snapshot().unwrap().pending_count, 1);
    }

    #[test]
    fn test_modify_unknown_record() {
        let store = Store::hydrated();
        let result = store.modify(&todos(), &LocalId::new(), |f| {
            f.insert("done".into(), json!(true));
        });
        assert!(matches!(result, Err(SyncError::UnknownRecord { .. })));
    }

    #[test]
    fn test_rejected_mutation_rolls_back() {
        let store = Store::hydrated();
        let record = Record::from_value(json!({"name": "a"}))
            .unwrap()
            .with_server_id(ServerId::from(1u64));
        store
            .transact(|state| state.records_mut(&todos()).push(record.clone()))
            .unwrap();

        assert!(store.remove(&todos(), &record.local_id).unwrap());
        let result = store.insert(&todos(), record.clone());
        assert!(matches!(result, Err(SyncError::ConflictingChange { .. })));
        assert!(store.records(&todos()).unwrap().is_empty());
        assert_eq!(store.pending_changes().unwrap()[0].version, 1);
    }

    #[test]
    fn test_no_op_update_queues_nothing() {
        let store = Store::hydrated();
        let count = store.update(&todos(), |records| records.len()).unwrap();
        assert_eq!(count, 0);
        assert!(store.pending_changes().unwrap().is_empty());
    }

    #[test]
    fn test_subscribers_see_pending_count() {
        let store = Store::hydrated();
        let mut rx = store.subscribe();
        store.insert(&todos(), Record::default()).unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().pending_count, 1);
    }
}
