// crates/sync-engine/src/push.rs
//! Dispatch of pending changes to the server
//!
//! Changes go out in three phases (creates, then updates, then removals),
//! each over a fresh snapshot of the queue and one call at a time. Before
//! every call the live queue entry is looked up again: anything already
//! acknowledged or superseded is skipped, so pushing twice never sends the
//! same work twice.

use crate::collaborator::Collaborator;
use crate::error::{SyncError, SyncResult};
use crate::store::Store;
use crate::types::{ChangeAction, CycleReport, PendingChange};
use mirrorsync_config::MissingRemoteStrategy;
use mirrorsync_core::{timestamp, CollectionKey, LocalId, Record};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Host callback for updates whose remote record is gone
///
/// Receives the collection and the local record as it was when the update
/// was attempted.
pub type MissingRemoteHook = Arc<dyn Fn(&CollectionKey, &Record) + Send + Sync>;

pub(crate) type Collaborators = BTreeMap<CollectionKey, Arc<dyn Collaborator>>;

/// What happened to one queued change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Server acknowledged the change
    Sent,
    /// Entry dropped without a successful call
    Discarded,
    /// Nothing to do right now
    Skipped,
}

pub(crate) struct Pusher<'a> {
    pub store: &'a Store,
    pub collaborators: &'a Collaborators,
    pub missing_remote: MissingRemoteStrategy,
    pub on_missing: Option<MissingRemoteHook>,
}

impl Pusher<'_> {
    /// Runs all three phases, collecting failures into the report
    pub async fn push_all(&self, report: &mut CycleReport) {
        for action in ChangeAction::DISPATCH_ORDER {
            let batch = match self.store.read(|state| state.sync.pending.of_action(action)) {
                Ok(batch) => batch,
                Err(e) => {
                    report.errors.push(e);
                    return;
                }
            };

            for queued in batch {
                match self.dispatch(&queued).await {
                    Ok(Dispatch::Sent) => report.pushed += 1,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!(
                            "Failed to push {} of {} in '{}': {}",
                            action,
                            queued.local_id,
                            queued.collection,
                            e
                        );
                        report.errors.push(e);
                    }
                }
            }
        }
    }

    /// Sends one queued change if it is still current
    pub async fn dispatch(&self, queued: &PendingChange) -> SyncResult<Dispatch> {
        let collection = &queued.collection;
        let live = self
            .store
            .read(|state| state.sync.pending.get(collection, &queued.local_id).cloned())?;

        let Some(live) = live else {
            return Ok(Dispatch::Skipped);
        };
        if live.action != queued.action {
            return Ok(Dispatch::Skipped);
        }

        let collaborator = self
            .collaborators
            .get(collection)
            .cloned()
            .ok_or_else(|| SyncError::MissingCollaborator(collection.clone()))?;

        match live.action {
            ChangeAction::Create => self.dispatch_create(collaborator.as_ref(), live).await,
            ChangeAction::Update => self.dispatch_update(collaborator.as_ref(), live).await,
            ChangeAction::Remove => self.dispatch_remove(collaborator.as_ref(), live).await,
        }
    }

    async fn dispatch_create(
        &self,
        collaborator: &dyn Collaborator,
        live: PendingChange,
    ) -> SyncResult<Dispatch> {
        let collection = &live.collection;
        let local_id = live.local_id;
        if self.local_record(collection, &local_id)?.is_none() {
            return self.discard_orphan(&live);
        }

        self.set_in_flight(collection, &local_id, true)?;
        let ack = match collaborator.add(live.changes.clone()).await {
            Ok(ack) => ack,
            Err(e) => {
                self.set_in_flight(collection, &local_id, false)?;
                return Err(SyncError::collaborator(collection, "add", e));
            }
        };

        self.store.transact(|state| {
            if let Some(ack) = &ack {
                if let Some(record) = state.find_mut(collection, &local_id) {
                    record.apply_ack(ack);
                }
            }
            if state
                .sync
                .pending
                .discard_if_version(collection, &local_id, live.version)
            {
                return;
            }
            let Some(entry) = state.sync.pending.get_mut(collection, &local_id) else {
                return;
            };
            entry.in_flight = false;

            // edited while in flight: keep the entry, now aimed at the known record
            if let Some(ack) = &ack {
                entry.server_id = Some(ack.id.clone());
                if entry.action == ChangeAction::Create {
                    entry.action = ChangeAction::Update;
                }
                if entry.action == ChangeAction::Update {
                    for (key, value) in &live.changes {
                        entry.before.insert(key.clone(), value.clone());
                    }
                }
            }
        })?;

        log::debug!("Created {} in '{}'", local_id, collection);
        Ok(Dispatch::Sent)
    }

    async fn dispatch_update(
        &self,
        collaborator: &dyn Collaborator,
        live: PendingChange,
    ) -> SyncResult<Dispatch> {
        let collection = &live.collection;
        let local_id = live.local_id;

        if self
            .store
            .read(|state| state.sync.conflicts.contains(&local_id))?
        {
            log::debug!("Holding update of {} until its conflict is resolved", local_id);
            return Ok(Dispatch::Skipped);
        }

        let Some(server_id) = live.server_id.clone() else {
            return self.dispatch_create(collaborator, live).await;
        };
        let Some(record) = self.local_record(collection, &local_id)? else {
            return self.discard_orphan(&live);
        };

        let found = collaborator
            .update(&server_id, &live.changes, &record)
            .await
            .map_err(|e| SyncError::collaborator(collection, "update", e))?;

        if !found {
            self.handle_missing_remote(&live, &record)?;
            return Ok(Dispatch::Discarded);
        }

        self.store.transact(|state| {
            if state
                .sync
                .pending
                .discard_if_version(collection, &local_id, live.version)
            {
                return;
            }
            // the server now holds the dispatched values
            if let Some(entry) = state.sync.pending.get_mut(collection, &local_id) {
                if entry.action == ChangeAction::Update {
                    for (key, value) in &live.changes {
                        entry.before.insert(key.clone(), value.clone());
                    }
                }
            }
        })?;

        log::debug!("Updated {} in '{}'", local_id, collection);
        Ok(Dispatch::Sent)
    }

    async fn dispatch_remove(
        &self,
        collaborator: &dyn Collaborator,
        live: PendingChange,
    ) -> SyncResult<Dispatch> {
        let collection = &live.collection;
        let local_id = live.local_id;

        let Some(server_id) = live.server_id.clone() else {
            self.forget(collection, &local_id)?;
            return Ok(Dispatch::Discarded);
        };

        collaborator
            .remove(&server_id)
            .await
            .map_err(|e| SyncError::collaborator(collection, "remove", e))?;

        self.forget(collection, &local_id)?;
        log::debug!("Removed {} ({}) from '{}'", local_id, server_id, collection);
        Ok(Dispatch::Sent)
    }

    fn handle_missing_remote(&self, live: &PendingChange, record: &Record) -> SyncResult<()> {
        let collection = &live.collection;
        let local_id = live.local_id;
        let strategy = self.missing_remote;

        self.store.transact(|state| {
            state.sync.pending.discard(collection, &local_id);
            state.sync.conflicts.clear(&local_id);

            match strategy {
                MissingRemoteStrategy::Ignore => {}
                MissingRemoteStrategy::DeleteLocalRecord => {
                    state.remove_record(collection, &local_id);
                }
                MissingRemoteStrategy::InsertRemoteRecord => {
                    if let Some(local) = state.find_mut(collection, &local_id) {
                        local.local_id = LocalId::new();
                        local.server_id = None;
                        local.updated_at = Some(timestamp::now());
                        let fresh = local.clone();
                        state.sync.pending.enqueue_create(collection, &fresh);
                    }
                }
            }
        })?;

        log::warn!(
            "Remote record for {} in '{}' is gone, applied '{}'",
            local_id,
            collection,
            strategy
        );
        if let Some(hook) = &self.on_missing {
            hook(collection, record);
        }
        Ok(())
    }

    fn local_record(
        &self,
        collection: &CollectionKey,
        local_id: &LocalId,
    ) -> SyncResult<Option<Record>> {
        self.store
            .read(|state| state.find(collection, local_id).cloned())
    }

    fn discard_orphan(&self, live: &PendingChange) -> SyncResult<Dispatch> {
        log::warn!(
            "Discarding {} for {} in '{}': local record is missing",
            live.action,
            live.local_id,
            live.collection
        );
        self.forget(&live.collection, &live.local_id)?;
        Ok(Dispatch::Discarded)
    }

    fn set_in_flight(
        &self,
        collection: &CollectionKey,
        local_id: &LocalId,
        in_flight: bool,
    ) -> SyncResult<()> {
        self.store.transact(|state| {
            if let Some(entry) = state.sync.pending.get_mut(collection, local_id) {
                entry.in_flight = in_flight;
            }
        })
    }

    fn forget(&self, collection: &CollectionKey, local_id: &LocalId) -> SyncResult<()> {
        self.store.transact(|state| {
            state.sync.pending.discard(collection, local_id);
            state.sync.conflicts.clear(local_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn todos() -> CollectionKey {
        CollectionKey::from("todos")
    }

    fn pusher<'a>(store: &'a Store, collaborators: &'a Collaborators) -> Pusher<'a> {
        Pusher {
            store,
            collaborators,
            missing_remote: MissingRemoteStrategy::Ignore,
            on_missing: None,
        }
    }

    #[tokio::test]
    async fn test_stale_copy_is_not_sent_twice() {
        let backend = Arc::new(MemoryBackend::new());
        let mut collaborators = Collaborators::new();
        collaborators.insert(todos(), Arc::new(backend.collection(todos())));
        let store = Store::hydrated();

        let id = store
            .insert(&todos(), Record::from_value(json!({"name": "a"})).unwrap())
            .unwrap();
        let stale = store.pending_changes().unwrap().remove(0);
        store
            .modify(&todos(), &id, |f| {
                f.insert("name".into(), json!("b"));
            })
            .unwrap();

        // the live entry is sent, not the copy
        let pusher = pusher(&store, &collaborators);
        assert_eq!(pusher.dispatch(&stale).await.unwrap(), Dispatch::Sent);
        let row = backend
            .live_rows(&todos())
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(row.fields.get("name"), Some(&json!("b")));

        assert_eq!(pusher.dispatch(&stale).await.unwrap(), Dispatch::Skipped);
        assert_eq!(backend.calls().unwrap().add, 1);
        assert!(store.pending_changes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_add_clears_in_flight_mark() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set_faults(crate::memory::FaultConfig::new(
                std::time::Duration::ZERO,
                std::time::Duration::ZERO,
                1.0,
            ))
            .unwrap();
        let mut collaborators = Collaborators::new();
        collaborators.insert(todos(), Arc::new(backend.collection(todos())));
        let store = Store::hydrated();

        let id = store
            .insert(&todos(), Record::from_value(json!({"name": "a"})).unwrap())
            .unwrap();
        let queued = store.pending_changes().unwrap().remove(0);
        assert!(pusher(&store, &collaborators).dispatch(&queued).await.is_err());

        let pending = store.pending_changes().unwrap();
        assert!(pending[0].is_unsent_create());

        // nothing reached the server, so a removal cancels the create
        store.remove(&todos(), &id).unwrap();
        assert!(store.pending_changes().unwrap().is_empty());
    }
}
