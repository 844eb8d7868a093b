// crates/sync-engine/src/engine.rs
//! Main sync engine

use crate::collaborator::Collaborator;
use crate::error::{SyncError, SyncResult};
use crate::first_load::first_load_collection;
use crate::lifecycle::{AlwaysForeground, HostLifecycle};
use crate::pull::pull_collection;
use crate::push::{Collaborators, MissingRemoteHook, Pusher};
use crate::scheduler::{CycleRunner, Scheduler};
use crate::store::Store;
use crate::types::{CycleError, CycleReport, PendingChange, SyncSnapshot, SyncStatus};
use async_trait::async_trait;
use mirrorsync_config::SyncConfig;
use mirrorsync_core::{CollectionKey, LocalId, Record};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;

/// Main synchronization engine
///
/// Cheap to clone; all clones drive the same engine. One cycle pulls every
/// registered collection and then pushes the pending queue. Cycles never
/// overlap: a trigger that arrives while one is running is dropped.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: SyncConfig,
    store: Arc<Store>,
    lifecycle: Arc<dyn HostLifecycle>,
    collaborators: RwLock<Collaborators>,
    on_missing: RwLock<Option<MissingRemoteHook>>,
    cycle: tokio::sync::Mutex<()>,
    last_pull: Mutex<HashMap<CollectionKey, Instant>>,
    scheduler: Mutex<Option<Scheduler>>,
    disabled: AtomicBool,
}

impl SyncEngine {
    /// Creates an engine for a host that is always in the foreground
    pub fn new(config: SyncConfig, store: Arc<Store>) -> Self {
        Self::with_lifecycle(config, store, Arc::new(AlwaysForeground::new()))
    }

    /// Creates an engine that follows the host's visibility
    pub fn with_lifecycle(
        config: SyncConfig,
        store: Arc<Store>,
        lifecycle: Arc<dyn HostLifecycle>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                lifecycle,
                collaborators: RwLock::new(Collaborators::new()),
                on_missing: RwLock::new(None),
                cycle: tokio::sync::Mutex::new(()),
                last_pull: Mutex::new(HashMap::new()),
                scheduler: Mutex::new(None),
                disabled: AtomicBool::new(false),
            }),
        }
    }

    /// Registers the collaborator of a collection
    pub fn register(
        &self,
        collection: impl Into<CollectionKey>,
        collaborator: Arc<dyn Collaborator>,
    ) -> SyncResult<()> {
        let collection = collection.into();
        if collection.is_blank() {
            return Err(SyncError::Misconfigured {
                collection,
                reason: "collection key is blank".to_string(),
            });
        }

        let mut collaborators = self
            .inner
            .collaborators
            .write()
            .map_err(|_| SyncError::LockPoisoned)?;
        if collaborators.contains_key(&collection) {
            return Err(SyncError::Misconfigured {
                collection,
                reason: "a collaborator is already registered".to_string(),
            });
        }

        log::info!(
            "Registered collection '{}' (first load: {})",
            collection,
            collaborator.capabilities().first_load
        );
        collaborators.insert(collection, collaborator);
        Ok(())
    }

    /// Sets the callback run when an update finds its remote record gone
    pub fn on_missing_remote<F>(&self, hook: F) -> SyncResult<()>
    where
        F: Fn(&CollectionKey, &Record) + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .on_missing
            .write()
            .map_err(|_| SyncError::LockPoisoned)?;
        *slot = Some(Arc::new(hook));
        Ok(())
    }

    /// Local store driven by this engine
    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// Engine settings
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Current observable state
    pub fn state(&self) -> SyncResult<SyncSnapshot> {
        self.inner.store.snapshot()
    }

    /// Subscribes to state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.store.subscribe()
    }

    /// Clones the pending queue
    pub fn pending_changes(&self) -> SyncResult<Vec<PendingChange>> {
        self.inner.store.pending_changes()
    }

    /// Returns true while the interval scheduler is running
    pub fn is_enabled(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|s| !s.is_finished()))
            .unwrap_or(false)
    }

    /// Applies the configured start-up state once the store is hydrated
    ///
    /// Starts the scheduler if `enabled_on_start` is set, otherwise leaves
    /// the engine disabled.
    pub fn start(&self) -> SyncResult<()> {
        if self
            .inner
            .store
            .read(|state| state.sync.status == SyncStatus::Hydrating)?
        {
            return Err(SyncError::NotReady);
        }
        self.enable(self.inner.config.enabled_on_start)
    }

    /// Starts or stops the interval scheduler
    ///
    /// Stopping never interrupts a cycle that is already running. Starting
    /// outside a Tokio runtime fails with [`SyncError::Custom`].
    pub fn enable(&self, enabled: bool) -> SyncResult<()> {
        if enabled && tokio::runtime::Handle::try_current().is_err() {
            return Err(SyncError::Custom(
                "starting the sync scheduler needs a Tokio runtime".to_string(),
            ));
        }
        self.inner.disabled.store(!enabled, Ordering::SeqCst);

        {
            let mut slot = self
                .inner
                .scheduler
                .lock()
                .map_err(|_| SyncError::LockPoisoned)?;
            if enabled {
                let running = slot.as_ref().is_some_and(|s| !s.is_finished());
                if !running {
                    let runner: Arc<dyn CycleRunner> = self.inner.clone();
                    *slot = Some(Scheduler::start(
                        Arc::downgrade(&runner),
                        self.inner.config.interval(),
                        self.inner.lifecycle.subscribe(),
                        self.inner.config.pause_in_background,
                    ));
                }
            } else if let Some(scheduler) = slot.take() {
                drop(scheduler.stop());
            }
        }

        self.inner.store.transact(|state| match state.sync.status {
            SyncStatus::Hydrating | SyncStatus::Syncing => {}
            _ if enabled => state.sync.status = SyncStatus::Idle,
            _ => state.sync.status = SyncStatus::Disabled,
        })
    }

    /// Runs one cycle now
    ///
    /// Returns `Ok(None)` if a cycle was already running and this trigger
    /// was dropped.
    pub async fn sync_now(&self) -> SyncResult<Option<CycleReport>> {
        self.inner.run_cycle_once().await
    }

    /// Downloads every collection that supports it, once
    ///
    /// Waits for a running cycle to finish first. Does nothing if a first
    /// load already completed.
    pub async fn start_first_load(&self) -> SyncResult<()> {
        self.inner.first_load().await
    }

    /// Settles a tracked conflict
    ///
    /// Keeping local values adopts the remote values of every field the
    /// pending change does not touch and leaves the change queued. Keeping
    /// remote values applies the stored remote snapshot and drops the
    /// pending change.
    pub fn resolve_conflict(&self, local_id: LocalId, keep_local: bool) -> SyncResult<()> {
        self.inner.store.try_transact(|state| {
            let conflict = state
                .sync
                .conflicts
                .clear(&local_id)
                .ok_or(SyncError::NoConflict(local_id))?;
            let collection = conflict.collection.clone();
            let touched: Vec<String> = state
                .sync
                .pending
                .get(&collection, &local_id)
                .map(|c| c.changes.keys().cloned().collect())
                .unwrap_or_default();

            if keep_local {
                if let Some(record) = state.find_mut(&collection, &local_id) {
                    for (key, value) in &conflict.remote_fields {
                        if !touched.contains(key) {
                            record.fields.insert(key.clone(), value.clone());
                        }
                    }
                    record.updated_at = Some(conflict.remote_updated_at);
                }
                // the remote values are the new base of the local edit
                if let Some(entry) = state.sync.pending.get_mut(&collection, &local_id) {
                    for key in &touched {
                        if let Some(value) = conflict.remote_fields.get(key) {
                            entry.before.insert(key.clone(), value.clone());
                        }
                    }
                }
            } else {
                if let Some(record) = state.find_mut(&collection, &local_id) {
                    record.merge_fields(&conflict.remote_fields);
                    record.updated_at = Some(conflict.remote_updated_at);
                }
                state.sync.pending.discard(&collection, &local_id);
            }

            log::info!(
                "Resolved conflict on {} in '{}' keeping {} values",
                local_id,
                collection,
                if keep_local { "local" } else { "remote" }
            );
            Ok(())
        })
    }
}

impl EngineInner {
    fn collaborators(&self) -> SyncResult<Collaborators> {
        self.collaborators
            .read()
            .map(|c| c.clone())
            .map_err(|_| SyncError::LockPoisoned)
    }

    fn missing_hook(&self) -> SyncResult<Option<MissingRemoteHook>> {
        self.on_missing
            .read()
            .map(|hook| hook.clone())
            .map_err(|_| SyncError::LockPoisoned)
    }

    fn resting_status(&self) -> SyncStatus {
        if self.disabled.load(Ordering::SeqCst) {
            SyncStatus::Disabled
        } else {
            SyncStatus::Idle
        }
    }

    /// Whether a collection's pull interval has elapsed
    fn pull_due(&self, collection: &CollectionKey) -> SyncResult<bool> {
        let Some(min_interval) = self.config.pull_interval(collection.as_str()) else {
            return Ok(true);
        };
        let last_pull = self.last_pull.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(last_pull
            .get(collection)
            .map_or(true, |at| at.elapsed() >= min_interval))
    }

    fn mark_pulled(&self, collection: &CollectionKey) -> SyncResult<()> {
        self.last_pull
            .lock()
            .map_err(|_| SyncError::LockPoisoned)?
            .insert(collection.clone(), Instant::now());
        Ok(())
    }

    /// Enters the syncing state; fails while the store is hydrating
    fn begin(&self) -> SyncResult<()> {
        self.store.try_transact(|state| {
            if state.sync.status == SyncStatus::Hydrating {
                return Err(SyncError::NotReady);
            }
            state.sync.status = SyncStatus::Syncing;
            state.sync.error = None;
            Ok(())
        })
    }

    async fn run_cycle_once(&self) -> SyncResult<Option<CycleReport>> {
        let Ok(_guard) = self.cycle.try_lock() else {
            log::debug!("Sync cycle already running, trigger dropped");
            return Ok(None);
        };
        self.begin()?;

        let collaborators = self.collaborators()?;
        let mut report = CycleReport::default();

        for (collection, collaborator) in &collaborators {
            if !self.pull_due(collection)? {
                report.skipped_collections.push(collection.clone());
                continue;
            }
            match pull_collection(
                &self.store,
                collection,
                collaborator.as_ref(),
                self.config.conflict_policy,
            )
            .await
            {
                Ok(stats) => {
                    report.pulled += stats.applied();
                    self.mark_pulled(collection)?;
                }
                Err(e) => {
                    log::warn!("Pull of '{}' failed: {}", collection, e);
                    report.errors.push(e);
                }
            }
        }

        let pusher = Pusher {
            store: &self.store,
            collaborators: &collaborators,
            missing_remote: self.config.missing_remote,
            on_missing: self.missing_hook()?,
        };
        pusher.push_all(&mut report).await;

        let error = report.errors.first().map(CycleError::from_error);
        let status = self.resting_status();
        self.store.transact(|state| {
            state.sync.error = error;
            state.sync.status = status;
        })?;

        if report.is_clean() {
            log::info!(
                "Sync cycle finished: {} pulled, {} pushed",
                report.pulled,
                report.pushed
            );
        } else {
            log::warn!(
                "Sync cycle finished with {} error(s): {} pulled, {} pushed",
                report.errors.len(),
                report.pulled,
                report.pushed
            );
        }
        Ok(Some(report))
    }

    async fn first_load(&self) -> SyncResult<()> {
        if self.store.read(|state| state.sync.first_load_done)? {
            log::debug!("First load already done");
            return Ok(());
        }

        let _guard = self.cycle.lock().await;
        self.begin()?;

        let collaborators = self.collaborators()?;
        let mut first_error = None;
        for (collection, collaborator) in &collaborators {
            if !collaborator.capabilities().first_load {
                log::debug!("'{}' has no first load, skipping", collection);
                continue;
            }
            if let Err(e) = first_load_collection(&self.store, collection, collaborator.as_ref()).await
            {
                log::error!("First load of '{}' failed: {}", collection, e);
                first_error.get_or_insert(e);
            }
        }

        let error = first_error.as_ref().map(CycleError::from_error);
        let done = first_error.is_none();
        let status = self.resting_status();
        self.store.transact(|state| {
            state.sync.first_load_done = done;
            state.sync.error = error;
            state.sync.status = status;
        })?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CycleRunner for EngineInner {
    async fn run_cycle(&self) {
        if let Err(e) = self.run_cycle_once().await {
            log::error!("Scheduled sync cycle failed: {}", e);
        }
    }
}
