// crates/sync-engine/src/diff.rs
//! Shallow diffing of collection snapshots
//!
//! Records are matched by local identity. Fields are compared at the top
//! level with `==`; nested values are opaque. Sync fields (`server_id`,
//! `updated_at`) live outside [`Fields`] and never show up in a diff.

use mirrorsync_core::{Fields, LocalId, Record, ServerId};
use serde_json::Value;
use std::collections::HashMap;

/// How one record differs between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub enum RecordDiff {
    /// Present only in the new snapshot
    Added,
    /// Present only in the old snapshot
    Removed,
    /// Present in both with at least one differing field
    Updated {
        /// New value of every differing field; `Null` for a dropped field
        changes: Fields,
        /// Old value of every differing field; `Null` for a new field
        before: Fields,
    },
}

/// One record's entry in a snapshot diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub local_id: LocalId,
    /// Server identity as last known for the record
    pub server_id: Option<ServerId>,
    /// Full fields of the new record; empty for a removal
    pub fields: Fields,
    pub diff: RecordDiff,
}

/// Diffs two snapshots of the same collection
///
/// Additions and updates come out in the order of `next`, followed by
/// removals in the order of `previous`.
pub fn diff_records(previous: &[Record], next: &[Record]) -> Vec<DiffEntry> {
    let old: HashMap<LocalId, &Record> = previous.iter().map(|r| (r.local_id, r)).collect();
    let new: HashMap<LocalId, &Record> = next.iter().map(|r| (r.local_id, r)).collect();
    let mut entries = Vec::new();

    for record in next {
        match old.get(&record.local_id) {
            None => entries.push(DiffEntry {
                local_id: record.local_id,
                server_id: record.server_id.clone(),
                fields: record.fields.clone(),
                diff: RecordDiff::Added,
            }),
            Some(prior) => {
                if let Some((changes, before)) = diff_fields(&prior.fields, &record.fields) {
                    entries.push(DiffEntry {
                        local_id: record.local_id,
                        server_id: record.server_id.clone().or_else(|| prior.server_id.clone()),
                        fields: record.fields.clone(),
                        diff: RecordDiff::Updated { changes, before },
                    });
                }
            }
        }
    }

    for record in previous {
        if !new.contains_key(&record.local_id) {
            entries.push(DiffEntry {
                local_id: record.local_id,
                server_id: record.server_id.clone(),
                fields: Fields::new(),
                diff: RecordDiff::Removed,
            });
        }
    }

    entries
}

/// Compares two field maps
///
/// Returns the changed values and their prior values, or `None` when the
/// maps are equal.
pub fn diff_fields(before: &Fields, after: &Fields) -> Option<(Fields, Fields)> {
    let mut changes = Fields::new();
    let mut prior = Fields::new();

    for (key, value) in after {
        let old = before.get(key).unwrap_or(&Value::Null);
        if old != value {
            changes.insert(key.clone(), value.clone());
            prior.insert(key.clone(), old.clone());
        }
    }

    for (key, value) in before {
        if !after.contains_key(key) && !value.is_null() {
            changes.insert(key.clone(), Value::Null);
            prior.insert(key.clone(), value.clone());
        }
    }

    if changes.is_empty() {
        None
    } else {
        Some((changes, prior))
    }
}
