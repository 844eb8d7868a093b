// crates/sync-engine/src/error.rs
//! Error types for sync operations

use mirrorsync_core::{CollectionKey, CoreError, ErrorSeverity, LocalId, ServerId};
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// A collaborator call failed; the pending work stays queued
    #[error("{operation} failed for collection '{collection}': {message}")]
    Collaborator {
        collection: CollectionKey,
        operation: &'static str,
        message: String,
    },

    /// Network error raised by a collaborator implementation
    #[error("Network error: {0}")]
    Network(String),

    /// Pending work references a collection with no collaborator
    #[error("No collaborator registered for collection '{0}'")]
    MissingCollaborator(CollectionKey),

    /// A collection registration is unusable
    #[error("Collection '{collection}' is misconfigured: {reason}")]
    Misconfigured {
        collection: CollectionKey,
        reason: String,
    },

    /// A record was added again while its removal is still pending
    #[error("Record {local_id} in '{collection}' was added while its removal is pending")]
    ConflictingChange {
        collection: CollectionKey,
        local_id: LocalId,
    },

    /// The server returned the same trailing identity twice during first load
    #[error("First load of '{collection}' stalled at cursor {cursor}")]
    FirstLoadStalled {
        collection: CollectionKey,
        cursor: ServerId,
    },

    /// The local store has not finished hydrating
    #[error("Sync store is still hydrating")]
    NotReady,

    /// A local operation named a record that does not exist
    #[error("Record {local_id} not found in '{collection}'")]
    UnknownRecord {
        collection: CollectionKey,
        local_id: LocalId,
    },

    /// No conflict is tracked for the record
    #[error("No conflict tracked for record {0}")]
    NoConflict(LocalId),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid model value
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Shared state lock was poisoned by a panicking thread
    #[error("Sync state lock poisoned")]
    LockPoisoned,

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl SyncError {
    /// Wraps a failed collaborator call
    pub fn collaborator(
        collection: &CollectionKey,
        operation: &'static str,
        source: impl std::fmt::Display,
    ) -> Self {
        Self::Collaborator {
            collection: collection.clone(),
            operation,
            message: source.to_string(),
        }
    }

    /// Returns the collection this error concerns, if any
    pub fn collection(&self) -> Option<&CollectionKey> {
        match self {
            Self::Collaborator { collection, .. }
            | Self::Misconfigured { collection, .. }
            | Self::ConflictingChange { collection, .. }
            | Self::FirstLoadStalled { collection, .. }
            | Self::UnknownRecord { collection, .. } => Some(collection),
            Self::MissingCollaborator(collection) => Some(collection),
            _ => None,
        }
    }

    /// Returns the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Collaborator { .. } | Self::Network(_) | Self::NotReady => {
                ErrorSeverity::Recoverable
            }
            Self::FirstLoadStalled { .. }
            | Self::UnknownRecord { .. }
            | Self::NoConflict(_)
            | Self::ConflictingChange { .. } => ErrorSeverity::Degraded,
            Self::MissingCollaborator(_)
            | Self::Misconfigured { .. }
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::Core(_)
            | Self::LockPoisoned
            | Self::Custom(_) => ErrorSeverity::Fatal,
        }
    }

    /// Returns true if retrying on a later cycle cannot help
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }
}
