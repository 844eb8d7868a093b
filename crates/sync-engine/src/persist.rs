// crates/sync-engine/src/persist.rs
//! JSON snapshot file for the local store

use crate::error::{SyncError, SyncResult};
use crate::store::{PersistedStore, Store};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Durable copy of a [`Store`] on disk
///
/// Writes go to a temporary file in the same directory and are renamed
/// into place, so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot; `None` if it was never written
    pub fn load(&self) -> SyncResult<Option<PersistedStore>> {
        if !self.path.exists() {
            log::debug!("No snapshot at {}", self.path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            SyncError::Storage(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let persisted = serde_json::from_str(&content)?;
        Ok(Some(persisted))
    }

    /// Writes a snapshot atomically
    pub fn save(&self, persisted: &PersistedStore) -> SyncResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| {
            SyncError::Storage(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let json = serde_json::to_string_pretty(persisted)?;
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| SyncError::Storage(format!("failed to create temp file: {}", e)))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| SyncError::Storage(format!("failed to write snapshot: {}", e)))?;
        temp.persist(&self.path).map_err(|e| {
            SyncError::Storage(format!("failed to replace {}: {}", self.path.display(), e))
        })?;

        log::debug!("Snapshot written to {}", self.path.display());
        Ok(())
    }

    /// Hydrates a store from the snapshot, or marks it ready if there is none
    pub fn hydrate(&self, store: &Store) -> SyncResult<()> {
        let persisted = self.load()?.unwrap_or_default();
        store.hydrate(persisted)
    }

    /// Writes the current state of a store
    pub fn save_store(&self, store: &Store) -> SyncResult<()> {
        self.save(&store.persisted()?)
    }
}
