// crates/sync-engine/src/collaborator.rs
//! Server-side operations supplied per collection
//!
//! The engine never talks to a network itself. Each registered collection
//! comes with a [`Collaborator`] that performs the four required calls and,
//! optionally, a paginated initial download.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mirrorsync_core::{Fields, Record, RemoteRecord, ServerAck, ServerId, Timestamp};

/// Optional abilities a collaborator declares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Supports cursor-paginated first load
    pub first_load: bool,
}

/// Remote operations for one collection
///
/// Failures are reported as errors (typically [`SyncError::Network`]); the
/// engine keeps the pending work and retries on a later cycle. Cycle reports
/// surface them wrapped as [`SyncError::Collaborator`], naming the collection
/// and the failed operation.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Creates a record on the server
    ///
    /// Returns the server-assigned fields (at least the identity), or `None`
    /// when the server accepted the record without reporting back.
    async fn add(&self, fields: Fields) -> SyncResult<Option<ServerAck>>;

    /// Sends field changes for a known record
    ///
    /// Returns `false` when the server no longer has the record.
    async fn update(&self, id: &ServerId, changes: &Fields, record: &Record) -> SyncResult<bool>;

    /// Removes a record on the server
    async fn remove(&self, id: &ServerId) -> SyncResult<()>;

    /// Returns records updated strictly after `since`, soft-deleted ones included
    async fn list(&self, since: Timestamp) -> SyncResult<Vec<RemoteRecord>>;

    /// Returns one page of records with identity greater than `after`,
    /// ascending by identity; an empty page ends the download
    async fn first_load(&self, after: Option<&ServerId>) -> SyncResult<Vec<RemoteRecord>> {
        let _ = after;
        Err(SyncError::Custom("first load is not supported".to_string()))
    }

    /// Declares optional abilities
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}
