// crates/sync-engine/src/first_load.rs
//! Cursor-paginated initial download

use crate::collaborator::Collaborator;
use crate::error::{SyncError, SyncResult};
use crate::pull::{merge_remote_batch, MergeMode};
use crate::store::Store;
use mirrorsync_config::ConflictPolicy;
use mirrorsync_core::{CollectionKey, ServerId};

/// Counters for one collection's first load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstLoadStats {
    pub pages: usize,
    pub records: usize,
}

/// Downloads a whole collection page by page
///
/// Each page is requested with the identity of the last record of the
/// previous page as cursor. An empty page ends the download. Two consecutive
/// pages ending on the same identity mean the server ignores the cursor, and
/// the download is aborted rather than looping forever.
pub(crate) async fn first_load_collection(
    store: &Store,
    collection: &CollectionKey,
    collaborator: &dyn Collaborator,
) -> SyncResult<FirstLoadStats> {
    if !collaborator.capabilities().first_load {
        return Err(SyncError::Misconfigured {
            collection: collection.clone(),
            reason: "collaborator does not support first load".to_string(),
        });
    }

    let mut stats = FirstLoadStats::default();
    let mut cursor: Option<ServerId> = None;

    loop {
        let page = collaborator
            .first_load(cursor.as_ref())
            .await
            .map_err(|e| SyncError::collaborator(collection, "first_load", e))?;

        let Some(last) = page.last().map(|r| r.id.clone()) else {
            break;
        };
        if cursor.as_ref() == Some(&last) {
            return Err(SyncError::FirstLoadStalled {
                collection: collection.clone(),
                cursor: last,
            });
        }

        stats.pages += 1;
        stats.records += page.len();
        store.transact(|state| {
            merge_remote_batch(
                state,
                collection,
                page,
                ConflictPolicy::RemoteWins,
                MergeMode::FirstLoad,
            )
        })?;

        log::debug!(
            "First load of '{}': page {} ended at {}",
            collection,
            stats.pages,
            last
        );
        cursor = Some(last);
    }

    log::info!(
        "First load of '{}' finished: {} record(s) in {} page(s)",
        collection,
        stats.records,
        stats.pages
    );
    Ok(stats)
}
