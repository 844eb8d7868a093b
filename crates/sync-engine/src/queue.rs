// crates/sync-engine/src/queue.rs
//! Coalescing queue of outstanding changes
//!
//! Holds at most one entry per (collection, local identity). Every local
//! mutation is folded into the existing entry and bumps its version, so an
//! in-flight dispatch can tell whether the record moved on while it waited.

use crate::diff::{DiffEntry, RecordDiff};
use crate::error::{SyncError, SyncResult};
use crate::types::{ChangeAction, PendingChange};
use mirrorsync_core::{CollectionKey, LocalId, Record, ServerId};
use serde::{Deserialize, Serialize};

/// Pending changes in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingQueue {
    entries: Vec<PendingChange>,
}

impl PendingQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records with outstanding work
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter()
    }

    /// Returns the entry for a record
    pub fn get(&self, collection: &CollectionKey, local_id: &LocalId) -> Option<&PendingChange> {
        self.position(collection, local_id).map(|i| &self.entries[i])
    }

    /// Returns the entry for a record, mutably
    pub fn get_mut(
        &mut self,
        collection: &CollectionKey,
        local_id: &LocalId,
    ) -> Option<&mut PendingChange> {
        self.position(collection, local_id)
            .map(move |i| &mut self.entries[i])
    }

    /// Returns true if a removal is pending for the given server identity
    pub fn has_pending_remove(&self, collection: &CollectionKey, server_id: &ServerId) -> bool {
        self.entries.iter().any(|c| {
            c.action == ChangeAction::Remove
                && &c.collection == collection
                && c.server_id.as_ref() == Some(server_id)
        })
    }

    /// Clones every entry of one action, in insertion order
    pub fn of_action(&self, action: ChangeAction) -> Vec<PendingChange> {
        self.entries
            .iter()
            .filter(|c| c.action == action)
            .cloned()
            .collect()
    }

    /// Folds one diffed mutation into the queue
    ///
    /// Re-adding a record whose removal is still pending is rejected with
    /// [`SyncError::ConflictingChange`] and leaves the queue untouched.
    pub fn record_change(&mut self, collection: &CollectionKey, entry: DiffEntry) -> SyncResult<()> {
        let DiffEntry {
            local_id,
            server_id,
            fields,
            diff,
        } = entry;
        let existing = self.position(collection, &local_id);

        match diff {
            RecordDiff::Removed => match existing {
                Some(i) if self.entries[i].is_unsent_create() => {
                    self.entries.remove(i);
                    log::debug!("Dropped unsent create of {} from '{}'", local_id, collection);
                }
                Some(i) => {
                    let change = &mut self.entries[i];
                    change.action = ChangeAction::Remove;
                    if change.server_id.is_none() {
                        change.server_id = server_id;
                    }
                    change.version += 1;
                }
                None => match server_id {
                    Some(server_id) => self.entries.push(PendingChange::new(
                        ChangeAction::Remove,
                        collection.clone(),
                        local_id,
                        Some(server_id),
                    )),
                    None => {
                        log::debug!("Dropped local-only record {} from '{}'", local_id, collection)
                    }
                },
            },
            RecordDiff::Added => match existing {
                Some(i) if self.entries[i].is_remove() => {
                    return Err(SyncError::ConflictingChange {
                        collection: collection.clone(),
                        local_id,
                    });
                }
                Some(i) => {
                    let change = &mut self.entries[i];
                    for (key, value) in fields {
                        change.changes.insert(key, value);
                    }
                    change.version += 1;
                }
                None => self.entries.push(
                    PendingChange::new(
                        ChangeAction::Create,
                        collection.clone(),
                        local_id,
                        server_id,
                    )
                    .with_changes(fields),
                ),
            },
            RecordDiff::Updated { changes, before } => match existing {
                Some(i) if self.entries[i].is_remove() => {
                    log::debug!("Ignoring edit of removed record {}", local_id);
                }
                Some(i) => {
                    let change = &mut self.entries[i];
                    for (key, value) in changes {
                        if change.action == ChangeAction::Update && !change.before.contains_key(&key)
                        {
                            if let Some(old) = before.get(&key) {
                                change.before.insert(key.clone(), old.clone());
                            }
                        }
                        change.changes.insert(key, value);
                    }
                    change.version += 1;
                }
                None if server_id.is_some() => self.entries.push(
                    PendingChange::new(
                        ChangeAction::Update,
                        collection.clone(),
                        local_id,
                        server_id,
                    )
                    .with_changes(changes)
                    .with_before(before),
                ),
                // never reached the server: the whole record is the payload
                None => self.entries.push(
                    PendingChange::new(ChangeAction::Create, collection.clone(), local_id, None)
                        .with_changes(fields),
                ),
            },
        }

        Ok(())
    }

    /// Queues a fresh create carrying the full record
    pub fn enqueue_create(&mut self, collection: &CollectionKey, record: &Record) {
        if let Some(i) = self.position(collection, &record.local_id) {
            self.entries.remove(i);
        }
        self.entries.push(
            PendingChange::new(
                ChangeAction::Create,
                collection.clone(),
                record.local_id,
                record.server_id.clone(),
            )
            .with_changes(record.fields.clone()),
        );
    }

    /// Removes and returns the entry for a record
    pub fn discard(
        &mut self,
        collection: &CollectionKey,
        local_id: &LocalId,
    ) -> Option<PendingChange> {
        self.position(collection, local_id)
            .map(|i| self.entries.remove(i))
    }

    /// Removes the entry only if no mutation happened since `version`
    pub fn discard_if_version(
        &mut self,
        collection: &CollectionKey,
        local_id: &LocalId,
        version: u64,
    ) -> bool {
        match self.position(collection, local_id) {
            Some(i) if self.entries[i].version == version => {
                self.entries.remove(i);
                true
            }
            _ => false,
        }
    }

    fn position(&self, collection: &CollectionKey, local_id: &LocalId) -> Option<usize> {
        self.entries
            .iter()
            .position(|c| &c.local_id == local_id && &c.collection == collection)
    }
}
