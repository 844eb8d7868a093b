// crates/sync-engine/src/conflict.rs
//! Conflict detection and tracking

use crate::types::PendingChange;
use mirrorsync_core::{timestamp, CollectionKey, Fields, LocalId, Record, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One field edited on both sides to different values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    /// Current local value
    pub local: Value,
    /// Value reported by the server
    pub remote: Value,
}

/// An unresolved divergence between a local record and its remote copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Collection of the record
    pub collection: CollectionKey,
    /// Conflicting fields, sorted by name
    pub fields: Vec<FieldConflict>,
    /// Remote field snapshot, kept so a resolution can apply it later
    pub remote_fields: Fields,
    /// Server update time of that snapshot
    pub remote_updated_at: Timestamp,
    /// When the conflict was detected
    pub detected_at: Timestamp,
}

impl Conflict {
    /// Returns the conflict entry of a field
    pub fn field(&self, name: &str) -> Option<&FieldConflict> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Names of the conflicting fields
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }
}

/// Unresolved conflicts keyed by local identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictTracker {
    entries: BTreeMap<LocalId, Conflict>,
}

impl ConflictTracker {
    /// Creates an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or replaces the conflict of a record
    pub fn record(&mut self, local_id: LocalId, conflict: Conflict) {
        log::warn!(
            "Conflict on {} in '{}': {}",
            local_id,
            conflict.collection,
            conflict.field_names().join(", ")
        );
        self.entries.insert(local_id, conflict);
    }

    /// Returns the conflict of a record
    pub fn get(&self, local_id: &LocalId) -> Option<&Conflict> {
        self.entries.get(local_id)
    }

    /// Returns true if a conflict is tracked for the record
    pub fn contains(&self, local_id: &LocalId) -> bool {
        self.entries.contains_key(local_id)
    }

    /// Drops the conflict of a record
    pub fn clear(&mut self, local_id: &LocalId) -> Option<Conflict> {
        self.entries.remove(local_id)
    }

    /// Number of unresolved conflicts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no conflicts
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All conflicts
    pub fn entries(&self) -> &BTreeMap<LocalId, Conflict> {
        &self.entries
    }
}

/// Finds the fields both sides changed to different values
///
/// A field conflicts when it is part of the pending change, the remote
/// value differs from the value the local edit started from, and it also
/// differs from the current local value.
pub fn detect_field_conflicts(
    change: &PendingChange,
    local: &Record,
    remote: &Fields,
) -> Vec<FieldConflict> {
    let mut conflicts = Vec::new();

    for field in change.changes.keys() {
        let Some(remote_value) = remote.get(field) else {
            continue;
        };
        let base = change.before.get(field).unwrap_or(&Value::Null);
        let local_value = local.fields.get(field).unwrap_or(&Value::Null);

        if remote_value != base && remote_value != local_value {
            conflicts.push(FieldConflict {
                field: field.clone(),
                local: local_value.clone(),
                remote: remote_value.clone(),
            });
        }
    }

    conflicts
}

/// Builds a conflict record from a remote snapshot
pub fn conflict_from_remote(
    collection: &CollectionKey,
    fields: Vec<FieldConflict>,
    remote_fields: &Fields,
    remote_updated_at: Timestamp,
) -> Conflict {
    Conflict {
        collection: collection.clone(),
        fields,
        remote_fields: remote_fields.clone(),
        remote_updated_at,
        detected_at: timestamp::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeAction;
    use mirrorsync_core::{fields_from_value, ServerId};
    use serde_json::json;

    fn pending(changes: Value, before: Value) -> PendingChange {
        PendingChange::new(
            ChangeAction::Update,
            CollectionKey::from("todos"),
            LocalId::new(),
            Some(ServerId::from(1u64)),
        )
        .with_changes(fields_from_value(changes).unwrap())
        .with_before(fields_from_value(before).unwrap())
    }

    #[test]
    fn test_both_sides_changed_same_field() {
        let change = pending(json!({"name": "local-change"}), json!({"name": "srv"}));
        let local = Record::from_value(json!({"name": "local-change"})).unwrap();
        let remote = fields_from_value(json!({"name": "remote-change"})).unwrap();

        let found = detect_field_conflicts(&change, &local, &remote);
        assert_eq!(
            found,
            vec![FieldConflict {
                field: "name".into(),
                local: json!("local-change"),
                remote: json!("remote-change"),
            }]
        );
    }

    #[test]
    fn test_remote_unchanged_from_base_is_not_a_conflict() {
        let change = pending(json!({"name": "local-change"}), json!({"name": "srv"}));
        let local = Record::from_value(json!({"name": "local-change"})).unwrap();
        let remote = fields_from_value(json!({"name": "srv", "extra": 1})).unwrap();

        assert!(detect_field_conflicts(&change, &local, &remote).is_empty());
    }

    #[test]
    fn test_same_value_on_both_sides_is_not_a_conflict() {
        let change = pending(json!({"name": "same"}), json!({"name": "srv"}));
        let local = Record::from_value(json!({"name": "same"})).unwrap();
        let remote = fields_from_value(json!({"name": "same"})).unwrap();

        assert!(detect_field_conflicts(&change, &local, &remote).is_empty());
    }

    #[test]
    fn test_tracker_record_and_clear() {
        let mut tracker = ConflictTracker::new();
        let id = LocalId::new();
        let conflict = conflict_from_remote(
            &CollectionKey::from("todos"),
            vec![FieldConflict {
                field: "name".into(),
                local: json!("a"),
                remote: json!("b"),
            }],
            &Fields::new(),
            timestamp::now(),
        );

        tracker.record(id, conflict);
        assert!(tracker.contains(&id));
        assert_eq!(tracker.get(&id).unwrap().field_names(), vec!["name"]);
        assert!(tracker.clear(&id).is_some());
        assert!(tracker.is_empty());
    }
}
