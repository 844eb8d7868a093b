// crates/sync-engine/src/pull.rs
//! Incremental download and merge of remote changes

use crate::collaborator::Collaborator;
use crate::conflict::{conflict_from_remote, detect_field_conflicts};
use crate::error::{SyncError, SyncResult};
use crate::store::{Store, StoreState};
use crate::types::PendingChange;
use mirrorsync_config::ConflictPolicy;
use mirrorsync_core::{CollectionKey, Record, RemoteRecord};

/// How a batch of remote records is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeMode {
    /// Regular pull: pending removals and edits are respected
    Incremental,
    /// Initial download: remote records are applied as they are
    FirstLoad,
}

/// Counters for one merged batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
    pub conflicts: usize,
}

impl MergeStats {
    /// Records that changed local state
    pub fn applied(&self) -> usize {
        self.inserted + self.updated + self.removed
    }
}

/// Pulls one collection since its watermark and merges the result
pub(crate) async fn pull_collection(
    store: &Store,
    collection: &CollectionKey,
    collaborator: &dyn Collaborator,
    policy: ConflictPolicy,
) -> SyncResult<MergeStats> {
    let since = store.read(|state| state.sync.watermark(collection))?;
    let batch = collaborator
        .list(since)
        .await
        .map_err(|e| SyncError::collaborator(collection, "list", e))?;

    let count = batch.len();
    let stats = store.transact(|state| {
        merge_remote_batch(state, collection, batch, policy, MergeMode::Incremental)
    })?;

    log::debug!(
        "Pulled {} record(s) for '{}': {} inserted, {} updated, {} removed, {} conflicted",
        count,
        collection,
        stats.inserted,
        stats.updated,
        stats.removed,
        stats.conflicts
    );
    Ok(stats)
}

/// Applies a batch of remote records to local state
///
/// The watermark moves to the newest timestamp seen, never backward.
pub(crate) fn merge_remote_batch(
    state: &mut StoreState,
    collection: &CollectionKey,
    batch: Vec<RemoteRecord>,
    policy: ConflictPolicy,
    mode: MergeMode,
) -> MergeStats {
    let mut stats = MergeStats::default();

    for remote in batch {
        state.sync.advance_watermark(collection, remote.updated_at);

        // a pending local removal wins over anything the server says
        if mode == MergeMode::Incremental
            && state.sync.pending.has_pending_remove(collection, &remote.id)
        {
            stats.skipped += 1;
            continue;
        }

        if remote.deleted {
            if let Some(record) = state.remove_by_server_id(collection, &remote.id) {
                state.sync.pending.discard(collection, &record.local_id);
                state.sync.conflicts.clear(&record.local_id);
                stats.removed += 1;
            }
            continue;
        }

        let local_id = state
            .records(collection)
            .iter()
            .find(|r| r.server_id.as_ref() == Some(&remote.id))
            .map(|r| r.local_id);
        let Some(local_id) = local_id else {
            state.records_mut(collection).push(Record::from_remote(&remote));
            stats.inserted += 1;
            continue;
        };

        let pending = match mode {
            MergeMode::FirstLoad => None,
            MergeMode::Incremental => state
                .sync
                .pending
                .get(collection, &local_id)
                .filter(|c| !c.is_remove())
                .cloned(),
        };

        match pending {
            None => {
                if let Some(record) = state.find_mut(collection, &local_id) {
                    record.merge_fields(&remote.fields);
                    record.updated_at = Some(remote.updated_at);
                    stats.updated += 1;
                }
            }
            Some(change) => {
                if merge_with_pending(state, collection, &remote, &change, policy) {
                    stats.updated += 1;
                } else if state.sync.conflicts.contains(&change.local_id) {
                    stats.conflicts += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }
    }

    stats
}

/// Resolves a remote record against a local record with a pending change
///
/// Returns true if local fields were changed.
fn merge_with_pending(
    state: &mut StoreState,
    collection: &CollectionKey,
    remote: &RemoteRecord,
    change: &PendingChange,
    policy: ConflictPolicy,
) -> bool {
    let local_id = change.local_id;
    let StoreState { collections, sync } = state;
    let Some(record) = collections
        .get_mut(collection)
        .and_then(|records| records.iter_mut().find(|r| r.local_id == local_id))
    else {
        return false;
    };

    match policy {
        ConflictPolicy::LocalWins => {
            log::debug!("Keeping local edits of {} over remote values", local_id);
            false
        }
        ConflictPolicy::RemoteWins => {
            record.merge_fields(&remote.fields);
            record.updated_at = Some(remote.updated_at);
            sync.pending.discard(collection, &local_id);
            sync.conflicts.clear(&local_id);
            true
        }
        ConflictPolicy::TryShallowMerge => {
            let conflicting = detect_field_conflicts(change, record, &remote.fields);
            if !conflicting.is_empty() {
                sync.conflicts.record(
                    local_id,
                    conflict_from_remote(collection, conflicting, &remote.fields, remote.updated_at),
                );
                return false;
            }

            for (key, value) in &remote.fields {
                if !change.changes.contains_key(key) {
                    record.fields.insert(key.clone(), value.clone());
                }
            }
            record.updated_at = Some(remote.updated_at);
            sync.conflicts.clear(&local_id);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_records;
    use crate::types::{ChangeAction, SyncStatus};
    use mirrorsync_core::{fields_from_value, timestamp, ServerId};
    use serde_json::{json, Value};

    fn key() -> CollectionKey {
        CollectionKey::from("todos")
    }

    fn ready_state() -> StoreState {
        let mut state = StoreState::default();
        state.sync.status = SyncStatus::Idle;
        state
    }

    fn remote(id: u64, millis: i64, fields: Value) -> RemoteRecord {
        RemoteRecord::new(
            ServerId::from(id),
            timestamp::from_millis(millis),
            fields_from_value(fields).unwrap(),
        )
    }

    fn synced(state: &mut StoreState, id: u64, fields: Value) -> Record {
        let mut record = Record::from_value(fields)
            .unwrap()
            .with_server_id(ServerId::from(id));
        record.updated_at = Some(timestamp::from_millis(1));
        state.records_mut(&key()).push(record.clone());
        record
    }

    fn edit(state: &mut StoreState, record: &Record, field: &str, value: Value) {
        let mut next = record.clone();
        next.set(field, value);
        for entry in diff_records(std::slice::from_ref(record), std::slice::from_ref(&next)) {
            state.sync.pending.record_change(&key(), entry).unwrap();
        }
        if let Some(local) = state.find_mut(&key(), &record.local_id) {
            *local = next;
        }
    }

    #[test]
    fn test_unknown_remote_is_inserted() {
        let mut state = ready_state();
        let stats = merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 10, json!({"name": "a"}))],
            ConflictPolicy::TryShallowMerge,
            MergeMode::Incremental,
        );
        assert_eq!(stats.inserted, 1);
        assert_eq!(state.records(&key())[0].server_id, Some(ServerId::from(1u64)));
        assert_eq!(state.sync.watermark(&key()), timestamp::from_millis(10));
    }

    #[test]
    fn test_watermark_uses_max_of_batch() {
        let mut state = ready_state();
        state.sync.advance_watermark(&key(), timestamp::from_millis(50));
        merge_remote_batch(
            &mut state,
            &key(),
            vec![
                remote(1, 70, json!({})),
                remote(2, 30, json!({})),
                remote(3, 60, json!({})),
            ],
            ConflictPolicy::TryShallowMerge,
            MergeMode::Incremental,
        );
        assert_eq!(state.sync.watermark(&key()), timestamp::from_millis(70));
    }

    #[test]
    fn test_soft_deleted_remote_drops_local_record() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "a"}));
        edit(&mut state, &record, "name", json!("b"));

        let stats = merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({})).tombstone()],
            ConflictPolicy::LocalWins,
            MergeMode::Incremental,
        );
        assert_eq!(stats.removed, 1);
        assert!(state.records(&key()).is_empty());
        assert!(state.sync.pending.is_empty());
    }

    #[test]
    fn test_pending_remove_blocks_resurrection() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "a"}));
        for entry in diff_records(std::slice::from_ref(&record), &[]) {
            state.sync.pending.record_change(&key(), entry).unwrap();
        }
        state.remove_record(&key(), &record.local_id);

        let stats = merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({"name": "a"}))],
            ConflictPolicy::TryShallowMerge,
            MergeMode::Incremental,
        );
        assert_eq!(stats.skipped, 1);
        assert!(state.records(&key()).is_empty());
        assert_eq!(state.sync.watermark(&key()), timestamp::from_millis(20));
    }

    #[test]
    fn test_remote_wins_drops_pending() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "srv"}));
        edit(&mut state, &record, "name", json!("mine"));

        merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({"name": "theirs"}))],
            ConflictPolicy::RemoteWins,
            MergeMode::Incremental,
        );
        assert_eq!(state.records(&key())[0].get("name"), Some(&json!("theirs")));
        assert!(state.sync.pending.is_empty());
    }

    #[test]
    fn test_local_wins_keeps_local_values() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "srv"}));
        edit(&mut state, &record, "name", json!("mine"));

        merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({"name": "theirs", "extra": 1}))],
            ConflictPolicy::LocalWins,
            MergeMode::Incremental,
        );
        let local = &state.records(&key())[0];
        assert_eq!(local.get("name"), Some(&json!("mine")));
        assert_eq!(local.get("extra"), None);
        assert_eq!(state.sync.pending.len(), 1);
        assert!(state.sync.conflicts.is_empty());
    }

    #[test]
    fn test_shallow_merge_applies_untouched_fields() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "srv", "extra": "old"}));
        edit(&mut state, &record, "name", json!("local-change"));

        let stats = merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({"name": "srv", "extra": "remote-extra"}))],
            ConflictPolicy::TryShallowMerge,
            MergeMode::Incremental,
        );
        assert_eq!(stats.updated, 1);
        let local = &state.records(&key())[0];
        assert_eq!(local.get("name"), Some(&json!("local-change")));
        assert_eq!(local.get("extra"), Some(&json!("remote-extra")));
        assert!(state.sync.conflicts.is_empty());
        let change = state.sync.pending.get(&key(), &record.local_id).unwrap();
        assert_eq!(change.action, ChangeAction::Update);
    }

    #[test]
    fn test_shallow_merge_records_conflict() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "srv"}));
        edit(&mut state, &record, "name", json!("local-change"));

        let stats = merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({"name": "remote-change"}))],
            ConflictPolicy::TryShallowMerge,
            MergeMode::Incremental,
        );
        assert_eq!(stats.conflicts, 1);
        let conflict = state.sync.conflicts.get(&record.local_id).unwrap();
        let field = conflict.field("name").unwrap();
        assert_eq!(field.local, json!("local-change"));
        assert_eq!(field.remote, json!("remote-change"));
        assert_eq!(
            state.records(&key())[0].get("name"),
            Some(&json!("local-change"))
        );
    }

    #[test]
    fn test_first_load_ignores_pending_edits() {
        let mut state = ready_state();
        let record = synced(&mut state, 1, json!({"name": "srv"}));
        edit(&mut state, &record, "name", json!("mine"));

        merge_remote_batch(
            &mut state,
            &key(),
            vec![remote(1, 20, json!({"name": "theirs"}))],
            ConflictPolicy::LocalWins,
            MergeMode::FirstLoad,
        );
        assert_eq!(state.records(&key())[0].get("name"), Some(&json!("theirs")));
    }
}
