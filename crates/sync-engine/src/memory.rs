// crates/sync-engine/src/memory.rs
//! In-memory server for tests and simulations
//!
//! [`MemoryBackend`] behaves like a small REST backend: numeric identities,
//! strictly increasing millisecond timestamps and soft deletes. Each
//! collection is served through a [`MemoryCollaborator`]. Latency and
//! failures can be injected to exercise retry paths.

use crate::collaborator::{Capabilities, Collaborator};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mirrorsync_core::{
    timestamp, CollectionKey, Fields, Record, RemoteRecord, ServerAck, ServerId, Timestamp,
};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default first-load page size
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Injected latency and failure rate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaultConfig {
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability in `0.0..=1.0` that a call fails before reaching the data
    pub failure_rate: f64,
}

impl FaultConfig {
    /// No latency, no failures
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a config, clamping the rate and ordering the latency bounds
    pub fn new(min_latency: Duration, max_latency: Duration, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_finite() {
            failure_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            min_latency: min_latency.min(max_latency),
            max_latency: max_latency.max(min_latency),
            failure_rate,
        }
    }
}

/// Number of calls served, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub add: usize,
    pub update: usize,
    pub remove: usize,
    pub list: usize,
    pub first_load: usize,
    /// Calls rejected by fault injection
    pub failures: usize,
}

#[derive(Debug, Clone)]
struct Row {
    fields: Fields,
    updated_at: Timestamp,
    deleted: bool,
}

impl Row {
    fn to_remote(&self, id: u64) -> RemoteRecord {
        RemoteRecord {
            id: ServerId::from(id),
            updated_at: self.updated_at,
            deleted: self.deleted,
            fields: self.fields.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct BackendState {
    collections: HashMap<CollectionKey, BTreeMap<u64, Row>>,
    next_id: u64,
    last_stamp: i64,
    calls: CallCounts,
}

impl BackendState {
    fn rows(&mut self, collection: &CollectionKey) -> &mut BTreeMap<u64, Row> {
        self.collections.entry(collection.clone()).or_default()
    }

    fn stamp(&mut self) -> Timestamp {
        let now = timestamp::now().timestamp_millis();
        self.last_stamp = now.max(self.last_stamp + 1);
        timestamp::from_millis(self.last_stamp)
    }

    fn insert(&mut self, collection: &CollectionKey, fields: Fields) -> RemoteRecord {
        self.next_id += 1;
        let id = self.next_id;
        let row = Row {
            fields,
            updated_at: self.stamp(),
            deleted: false,
        };
        let remote = row.to_remote(id);
        self.rows(collection).insert(id, row);
        remote
    }

    fn update(&mut self, collection: &CollectionKey, id: &ServerId, changes: &Fields) -> bool {
        let stamp = self.stamp();
        let Some(id) = id.as_u64() else {
            return false;
        };
        let Some(row) = self.rows(collection).get_mut(&id) else {
            return false;
        };
        if row.deleted {
            return false;
        }
        for (key, value) in changes {
            row.fields.insert(key.clone(), value.clone());
        }
        row.updated_at = stamp;
        true
    }

    fn soft_delete(&mut self, collection: &CollectionKey, id: &ServerId) -> bool {
        let stamp = self.stamp();
        let Some(id) = id.as_u64() else {
            return false;
        };
        let Some(row) = self.rows(collection).get_mut(&id) else {
            return false;
        };
        if row.deleted {
            return false;
        }
        row.deleted = true;
        row.updated_at = stamp;
        true
    }
}

/// Shared in-memory server
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    faults: Mutex<FaultConfig>,
    page_size: usize,
}

impl MemoryBackend {
    /// Creates an empty server without faults
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates an empty server with a custom first-load page size
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            faults: Mutex::new(FaultConfig::none()),
            page_size: page_size.max(1),
        }
    }

    /// Replaces the fault configuration
    pub fn set_faults(&self, faults: FaultConfig) -> SyncResult<()> {
        *self.faults.lock().map_err(|_| SyncError::LockPoisoned)? = faults;
        Ok(())
    }

    /// Returns a collaborator serving one collection
    pub fn collection(self: &Arc<Self>, collection: impl Into<CollectionKey>) -> MemoryCollaborator {
        MemoryCollaborator {
            backend: Arc::clone(self),
            collection: collection.into(),
            first_load: true,
            acknowledge: true,
        }
    }

    /// Inserts a row as another client would
    pub fn insert_row(
        &self,
        collection: &CollectionKey,
        fields: Fields,
    ) -> SyncResult<RemoteRecord> {
        Ok(self.lock()?.insert(collection, fields))
    }

    /// Updates a row as another client would
    pub fn update_row(
        &self,
        collection: &CollectionKey,
        id: &ServerId,
        changes: Fields,
    ) -> SyncResult<bool> {
        Ok(self.lock()?.update(collection, id, &changes))
    }

    /// Soft-deletes a row as another client would
    pub fn delete_row(&self, collection: &CollectionKey, id: &ServerId) -> SyncResult<bool> {
        Ok(self.lock()?.soft_delete(collection, id))
    }

    /// Drops a row without leaving a tombstone
    pub fn purge_row(&self, collection: &CollectionKey, id: &ServerId) -> SyncResult<bool> {
        let mut state = self.lock()?;
        Ok(id
            .as_u64()
            .and_then(|id| state.rows(collection).remove(&id))
            .is_some())
    }

    /// Returns one row, tombstones included
    pub fn row(&self, collection: &CollectionKey, id: &ServerId) -> SyncResult<Option<RemoteRecord>> {
        let mut state = self.lock()?;
        Ok(id.as_u64().and_then(|id| {
            state
                .rows(collection)
                .get(&id)
                .map(|row| row.to_remote(id))
        }))
    }

    /// Returns all rows that are not soft-deleted, by identity
    pub fn live_rows(&self, collection: &CollectionKey) -> SyncResult<Vec<RemoteRecord>> {
        let mut state = self.lock()?;
        Ok(state
            .rows(collection)
            .iter()
            .filter(|(_, row)| !row.deleted)
            .map(|(id, row)| row.to_remote(*id))
            .collect())
    }

    /// Returns the call counters
    pub fn calls(&self) -> SyncResult<CallCounts> {
        Ok(self.lock()?.calls)
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, BackendState>> {
        self.state.lock().map_err(|_| SyncError::LockPoisoned)
    }

    /// Applies injected latency, then maybe fails the call
    async fn simulate(&self, operation: &str) -> SyncResult<()> {
        let faults = *self.faults.lock().map_err(|_| SyncError::LockPoisoned)?;
        let (delay, fail) = {
            let mut rng = rand::thread_rng();
            let delay = if faults.max_latency > faults.min_latency {
                rng.gen_range(faults.min_latency..=faults.max_latency)
            } else {
                faults.min_latency
            };
            let fail = faults.failure_rate > 0.0 && rng.gen_bool(faults.failure_rate.min(1.0));
            (delay, fail)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            self.lock()?.calls.failures += 1;
            return Err(SyncError::Network(format!("injected {} failure", operation)));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// One collection of a [`MemoryBackend`]
#[derive(Debug, Clone)]
pub struct MemoryCollaborator {
    backend: Arc<MemoryBackend>,
    collection: CollectionKey,
    first_load: bool,
    acknowledge: bool,
}

impl MemoryCollaborator {
    /// Turns first-load support off
    pub fn without_first_load(mut self) -> Self {
        self.first_load = false;
        self
    }

    /// Makes `add` return nothing, as servers that do not echo records do
    pub fn without_ack(mut self) -> Self {
        self.acknowledge = false;
        self
    }
}

#[async_trait]
impl Collaborator for MemoryCollaborator {
    async fn add(&self, fields: Fields) -> SyncResult<Option<ServerAck>> {
        self.backend.simulate("add").await?;
        let mut state = self.backend.lock()?;
        state.calls.add += 1;
        let remote = state.insert(&self.collection, fields);
        Ok(self
            .acknowledge
            .then(|| ServerAck::new(remote.id, remote.updated_at)))
    }

    async fn update(&self, id: &ServerId, changes: &Fields, _record: &Record) -> SyncResult<bool> {
        self.backend.simulate("update").await?;
        let mut state = self.backend.lock()?;
        state.calls.update += 1;
        Ok(state.update(&self.collection, id, changes))
    }

    async fn remove(&self, id: &ServerId) -> SyncResult<()> {
        self.backend.simulate("remove").await?;
        let mut state = self.backend.lock()?;
        state.calls.remove += 1;
        state.soft_delete(&self.collection, id);
        Ok(())
    }

    async fn list(&self, since: Timestamp) -> SyncResult<Vec<RemoteRecord>> {
        self.backend.simulate("list").await?;
        let mut state = self.backend.lock()?;
        state.calls.list += 1;
        let mut changed: Vec<RemoteRecord> = state
            .rows(&self.collection)
            .iter()
            .filter(|(_, row)| row.updated_at > since)
            .map(|(id, row)| row.to_remote(*id))
            .collect();
        changed.sort_by_key(|r| r.updated_at);
        Ok(changed)
    }

    async fn first_load(&self, after: Option<&ServerId>) -> SyncResult<Vec<RemoteRecord>> {
        self.backend.simulate("first_load").await?;
        let page_size = self.backend.page_size;
        let floor = after.and_then(ServerId::as_u64).unwrap_or(0);
        let mut state = self.backend.lock()?;
        state.calls.first_load += 1;
        Ok(state
            .rows(&self.collection)
            .range(floor.saturating_add(1)..)
            .filter(|(_, row)| !row.deleted)
            .take(page_size)
            .map(|(id, row)| row.to_remote(*id))
            .collect())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            first_load: self.first_load,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_core::fields_from_value;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        fields_from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_add_assigns_increasing_ids_and_timestamps() {
        let backend = Arc::new(MemoryBackend::new());
        let todos = backend.collection("todos");

        let a = todos.add(fields(json!({"name": "a"}))).await.unwrap().unwrap();
        let b = todos.add(fields(json!({"name": "b"}))).await.unwrap().unwrap();
        assert_eq!(a.id, ServerId::from(1u64));
        assert_eq!(b.id, ServerId::from(2u64));
        assert!(b.updated_at > a.updated_at);
    }

    #[tokio::test]
    async fn test_update_of_missing_or_deleted_row() {
        let backend = Arc::new(MemoryBackend::new());
        let todos = backend.collection("todos");
        let record = Record::default();

        assert!(!todos
            .update(&ServerId::from(9u64), &Fields::new(), &record)
            .await
            .unwrap());

        let ack = todos.add(fields(json!({"name": "a"}))).await.unwrap().unwrap();
        todos.remove(&ack.id).await.unwrap();
        assert!(!todos.update(&ack.id, &Fields::new(), &record).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_strictly_after_since() {
        let backend = Arc::new(MemoryBackend::new());
        let todos = backend.collection("todos");
        let first = todos.add(fields(json!({"n": 1}))).await.unwrap().unwrap();
        todos.add(fields(json!({"n": 2}))).await.unwrap();

        let all = todos.list(timestamp::epoch()).await.unwrap();
        assert_eq!(all.len(), 2);
        let later = todos.list(first.updated_at.unwrap()).await.unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].fields.get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_remove_leaves_tombstone() {
        let backend = Arc::new(MemoryBackend::new());
        let key = CollectionKey::from("todos");
        let todos = backend.collection(key.clone());
        let ack = todos.add(fields(json!({"n": 1}))).await.unwrap().unwrap();

        todos.remove(&ack.id).await.unwrap();
        assert!(backend.row(&key, &ack.id).unwrap().unwrap().deleted);
        assert!(backend.live_rows(&key).unwrap().is_empty());
        assert_eq!(backend.calls().unwrap().remove, 1);
    }

    #[tokio::test]
    async fn test_first_load_pages() {
        let backend = Arc::new(MemoryBackend::with_page_size(2));
        let key = CollectionKey::from("todos");
        for n in 0..5 {
            backend.insert_row(&key, fields(json!({ "n": n }))).unwrap();
        }
        let todos = backend.collection(key);

        let page = todos.first_load(None).await.unwrap();
        assert_eq!(page.len(), 2);
        let page = todos.first_load(Some(&page[1].id)).await.unwrap();
        assert_eq!(page[0].id, ServerId::from(3u64));
        let page = todos.first_load(Some(&ServerId::from(5u64))).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set_faults(FaultConfig::new(Duration::ZERO, Duration::ZERO, 1.0))
            .unwrap();
        let todos = backend.collection("todos");

        let result = todos.list(timestamp::epoch()).await;
        assert!(matches!(result, Err(SyncError::Network(_))));
        assert_eq!(backend.calls().unwrap().failures, 1);
        assert_eq!(backend.calls().unwrap().list, 0);
    }

    #[test]
    fn test_fault_config_clamps() {
        let faults = FaultConfig::new(Duration::from_millis(9), Duration::from_millis(3), 4.0);
        assert_eq!(faults.min_latency, Duration::from_millis(3));
        assert_eq!(faults.max_latency, Duration::from_millis(9));
        assert_eq!(faults.failure_rate, 1.0);
    }
}
