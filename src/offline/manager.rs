//! Offline pack lifecycle controller
//!
//! Orchestrates create / observe / list / delete against a
//! [`StorageEngine`], keeps the [`RegionRegistry`] in step and reports
//! every asynchronous outcome through a [`NotificationSink`].
//!
//! Each operation comes in two forms: an `async fn` that resolves to the
//! outcome (and also notifies), and a `submit_*` method that spawns the
//! same work and returns immediately with a cancellable handle.

use crate::core::config::OfflineConfig;
use crate::core::constants::events;
use crate::core::geo::LatLngBounds;
use crate::notify::{
    self, NotificationSink, PackCreatedPayload, PackDeletedPayload, PackEntryPayload,
    PackErrorPayload, PackProgressPayload, PacksLoadedPayload, TileLimitPayload,
};
use crate::offline::engine::{EngineError, RegionEvent, StorageEngine};
use crate::offline::metadata::MetadataCodec;
use crate::offline::region::{
    DownloadState, PackEvent, PackProgress, PackState, RegionDefinition, RegionHandle,
};
use crate::offline::registry::{RegionEntry, RegionRegistry};
use crate::prelude::{HashMap, HashSet};
use crate::runtime::{self, AsyncHandle};
use crate::{BridgeError, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything needed to create a pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePackRequest {
    pub uuid: String,
    pub name: String,
    pub bounds: LatLngBounds,
    pub min_zoom: u8,
    pub max_zoom: u8,
    #[serde(rename = "styleURL")]
    pub style_url: String,
}

impl CreatePackRequest {
    pub fn definition(&self) -> RegionDefinition {
        RegionDefinition::new(self.bounds, self.min_zoom, self.max_zoom, self.style_url.clone())
    }
}

/// A pack as reported by [`OfflineManager::packs`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSummary {
    pub uuid: String,
    pub name: String,
    pub handle: RegionHandle,
    pub state: Option<PackState>,
}

struct Observer {
    generation: u64,
    /// Set once the task has decided to stop
    stopping: Arc<AtomicBool>,
    task: Box<dyn AsyncHandle>,
}

impl Observer {
    fn is_live(&self) -> bool {
        !self.stopping.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

struct ManagerInner {
    engine: Arc<dyn StorageEngine>,
    sink: Arc<dyn NotificationSink>,
    registry: RegionRegistry,
    codec: MetadataCodec,
    config: OfflineConfig,
    states: Mutex<HashMap<String, PackState>>,
    /// UUIDs whose create request has not completed yet
    pending: Mutex<HashSet<String>>,
    observers: Mutex<HashMap<String, Observer>>,
    next_generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Manages offline packs on top of a storage engine
#[derive(Clone)]
pub struct OfflineManager {
    inner: Arc<ManagerInner>,
}

impl OfflineManager {
    /// Creates a manager without touching the engine
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        sink: Arc<dyn NotificationSink>,
        config: OfflineConfig,
    ) -> Self {
        let codec = MetadataCodec::new(config.max_metadata_bytes);
        let registry = RegionRegistry::new(codec.clone(), config.fallback_name_prefix.clone());
        Self {
            inner: Arc::new(ManagerInner {
                engine,
                sink,
                registry,
                codec,
                config,
                states: Mutex::new(HashMap::default()),
                pending: Mutex::new(HashSet::default()),
                observers: Mutex::new(HashMap::default()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a manager and, unless disabled, lists persisted packs in the
    /// background so packs from an earlier process are rediscovered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        engine: Arc<dyn StorageEngine>,
        sink: Arc<dyn NotificationSink>,
        config: OfflineConfig,
    ) -> Self {
        let manager = Self::new(engine, sink, config);
        if manager.inner.config.list_on_start {
            manager.submit_list_packs();
        }
        manager
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.inner.config
    }

    pub fn pack_state(&self, uuid: &str) -> Option<PackState> {
        lock(&self.inner.states).get(uuid).copied()
    }

    /// Indexed packs, ordered by name then UUID
    pub fn packs(&self) -> Vec<PackSummary> {
        let snapshot = self.inner.registry.snapshot();
        let states = lock(&self.inner.states);
        let mut packs: Vec<PackSummary> = snapshot
            .iter()
            .map(|(uuid, entry)| PackSummary {
                uuid: uuid.clone(),
                name: entry.name.clone(),
                handle: entry.handle,
                state: states.get(uuid).copied(),
            })
            .collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uuid.cmp(&b.uuid)));
        packs
    }

    // --- create ------------------------------------------------------------------------------

    /// Creates a pack, indexes it and (by default) starts downloading it
    pub async fn create_pack(&self, request: CreatePackRequest) -> Result<RegionHandle> {
        let uuid = request.uuid.clone();
        let definition = request.definition();

        if let Err(e) = definition.validate() {
            self.notify_create_failed(&uuid, "invalid", &e.to_string());
            return Err(e);
        }
        self.reserve(&uuid)?;
        self.set_state(&uuid, PackState::Requested);

        let metadata = self
            .inner
            .codec
            .encode(&request.name, &uuid)
            .unwrap_or_else(|e| {
                log::warn!("creating pack '{}' without metadata: {}", uuid, e);
                Vec::new()
            });

        log::info!(
            "creating pack '{}' ({}) for zooms {}-{}",
            request.name,
            uuid,
            request.min_zoom,
            request.max_zoom
        );
        let created = self.inner.engine.create_region(definition, metadata).await;

        let handle = match created {
            Ok(handle) => handle,
            Err(e) => {
                lock(&self.inner.pending).remove(&uuid);
                self.transition(&uuid, PackEvent::CreateFailed);
                log::error!("engine refused pack '{}': {}", uuid, e);
                self.notify_create_failed(&uuid, &e.reason.to_string(), &e.message);
                return Err(BridgeError::Create { uuid, source: e });
            }
        };

        self.inner
            .registry
            .insert(uuid.clone(), RegionEntry::new(handle, request.name.clone()))
            .await;
        lock(&self.inner.pending).remove(&uuid);
        self.transition(&uuid, PackEvent::CreateSucceeded);

        notify::emit(
            self.inner.sink.as_ref(),
            events::PACK_CREATED,
            &PackCreatedPayload {
                uuid: uuid.clone(),
                name: request.name.clone(),
            },
        );

        if self.inner.config.activate_on_create {
            if let Err(e) = self.activate(&uuid, handle, &request.name) {
                log::error!("pack '{}' was created but could not be activated: {}", uuid, e);
            }
        }
        Ok(handle)
    }

    /// Spawns [`create_pack`](Self::create_pack); the outcome is only notified
    pub fn submit_create_pack(&self, request: CreatePackRequest) -> Box<dyn AsyncHandle> {
        let manager = self.clone();
        runtime::spawn(async move {
            if let Err(e) = manager.create_pack(request).await {
                log::debug!("submitted create finished with: {}", e);
            }
        })
    }

    /// Claims `uuid` for an in-flight create
    fn reserve(&self, uuid: &str) -> Result<()> {
        let mut pending = lock(&self.inner.pending);
        let taken = pending.contains(uuid) || self.inner.registry.contains(uuid);
        if taken && self.inner.config.reject_duplicate_uuids {
            drop(pending);
            log::warn!("rejecting create for duplicate uuid '{}'", uuid);
            self.notify_create_failed(uuid, "duplicate", "a pack with this uuid already exists");
            return Err(BridgeError::DuplicateUuid(uuid.to_string()));
        }
        pending.insert(uuid.to_string());
        Ok(())
    }

    fn notify_create_failed(&self, uuid: &str, reason: &str, message: &str) {
        notify::emit(
            self.inner.sink.as_ref(),
            events::PACK_CREATE_FAILED,
            &PackErrorPayload {
                uuid: uuid.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
            },
        );
    }

    // --- download state ----------------------------------------------------------------------

    /// Starts or pauses downloading an indexed pack.
    ///
    /// Pausing stops new tile fetches but keeps what was downloaded.
    pub fn set_pack_download_state(&self, uuid: &str, state: DownloadState) -> Result<()> {
        let entry = self
            .inner
            .registry
            .get(uuid)
            .ok_or_else(|| BridgeError::NotFound(uuid.to_string()))?;

        match state {
            DownloadState::Active => self.activate(uuid, entry.handle, &entry.name),
            DownloadState::Inactive => {
                self.inner
                    .engine
                    .set_download_state(entry.handle, DownloadState::Inactive)
                    .map_err(|source| BridgeError::Download {
                        uuid: uuid.to_string(),
                        source,
                    })?;
                self.transition(uuid, PackEvent::Deactivated);
                log::info!("paused pack '{}'", uuid);
                Ok(())
            }
        }
    }

    pub fn resume_pack(&self, uuid: &str) -> Result<()> {
        self.set_pack_download_state(uuid, DownloadState::Active)
    }

    pub fn pause_pack(&self, uuid: &str) -> Result<()> {
        self.set_pack_download_state(uuid, DownloadState::Inactive)
    }

    /// Observes the pack (if not observed already) and activates its download.
    ///
    /// The state moves to downloading before the engine is asked, since
    /// status updates may arrive before the call returns.
    fn activate(&self, uuid: &str, handle: RegionHandle, name: &str) -> Result<()> {
        if let Err(e) = self.ensure_observer(uuid, handle, name) {
            return Err(self.activation_failed(uuid, e));
        }

        let previous = self.pack_state(uuid);
        self.transition(uuid, PackEvent::Activated);
        if let Err(e) = self
            .inner
            .engine
            .set_download_state(handle, DownloadState::Active)
        {
            if let Some(previous) = previous {
                self.set_state(uuid, previous);
            }
            return Err(self.activation_failed(uuid, e));
        }
        log::info!("downloading pack '{}'", uuid);
        Ok(())
    }

    fn activation_failed(&self, uuid: &str, error: EngineError) -> BridgeError {
        notify::emit(
            self.inner.sink.as_ref(),
            events::PACK_ERROR,
            &PackErrorPayload::from_engine(uuid, &error),
        );
        BridgeError::Download {
            uuid: uuid.to_string(),
            source: error,
        }
    }

    // --- observation -------------------------------------------------------------------------

    fn ensure_observer(
        &self,
        uuid: &str,
        handle: RegionHandle,
        name: &str,
    ) -> std::result::Result<(), EngineError> {
        let mut observers = lock(&self.inner.observers);
        if observers.get(uuid).map(Observer::is_live).unwrap_or(false) {
            return Ok(());
        }

        let mut stream = self.inner.engine.observe_region(handle)?;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let uuid_owned = uuid.to_string();
        let name = name.to_string();
        let stopping = Arc::new(AtomicBool::new(false));
        let stopping_task = Arc::clone(&stopping);

        let task = runtime::spawn(async move {
            while let Some(event) = stream.next().await {
                if !manager.handle_region_event(&uuid_owned, &name, event, &stopping_task) {
                    break;
                }
            }
            stopping_task.store(true, Ordering::SeqCst);
            log::debug!("stopped observing pack '{}'", uuid_owned);
            let mut observers = lock(&manager.inner.observers);
            if observers
                .get(&uuid_owned)
                .map(|o| o.generation == generation)
                .unwrap_or(false)
            {
                observers.remove(&uuid_owned);
            }
        });

        if let Some(previous) = observers.insert(
            uuid.to_string(),
            Observer {
                generation,
                stopping,
                task,
            },
        ) {
            previous.task.cancel();
        }
        Ok(())
    }

    /// Reacts to one engine event; returns `false` once the pack stops being observed.
    ///
    /// `stopping` is raised before the final state change so a resume that
    /// observes the new state also sees the observer as gone.
    fn handle_region_event(
        &self,
        uuid: &str,
        name: &str,
        event: RegionEvent,
        stopping: &AtomicBool,
    ) -> bool {
        match event {
            RegionEvent::Status(status) => {
                let progress = PackProgress::from_status(&status);
                log::debug!(
                    "pack '{}': {}/{} resources ({:.1}%)",
                    uuid,
                    status.completed_resource_count,
                    status.required_resource_count,
                    progress.percent
                );
                notify::emit(
                    self.inner.sink.as_ref(),
                    events::PACK_PROGRESS,
                    &PackProgressPayload {
                        uuid: uuid.to_string(),
                        name: name.to_string(),
                        progress: progress.percent,
                        determinate: progress.determinate,
                        is_complete: progress.is_complete,
                        completed_resource_count: status.completed_resource_count,
                        required_resource_count: status.required_resource_count,
                        completed_resource_size: status.completed_resource_size,
                    },
                );
                if progress.is_complete {
                    stopping.store(true, Ordering::SeqCst);
                    self.transition(uuid, PackEvent::StatusComplete);
                    log::info!("pack '{}' is complete", uuid);
                    return false;
                }
                true
            }
            RegionEvent::Error(error) => {
                log::warn!("download error for pack '{}': {}", uuid, error);
                self.transition(uuid, PackEvent::DownloadError { terminal: false });
                notify::emit(
                    self.inner.sink.as_ref(),
                    events::PACK_ERROR,
                    &PackErrorPayload::from_engine(uuid, &error),
                );
                true
            }
            RegionEvent::TileCountLimitExceeded(limit) => {
                log::warn!("pack '{}' exceeds the tile limit of {}", uuid, limit);
                stopping.store(true, Ordering::SeqCst);
                self.transition(uuid, PackEvent::DownloadError { terminal: true });
                notify::emit(
                    self.inner.sink.as_ref(),
                    events::TILE_LIMIT_EXCEEDED,
                    &TileLimitPayload {
                        uuid: uuid.to_string(),
                        limit,
                    },
                );
                false
            }
        }
    }

    fn stop_observing(&self, uuid: &str) {
        if let Some(observer) = lock(&self.inner.observers).remove(uuid) {
            observer.task.cancel();
        }
    }

    /// Whether a live observer task exists for `uuid`
    pub fn is_observing(&self, uuid: &str) -> bool {
        lock(&self.inner.observers)
            .get(uuid)
            .map(Observer::is_live)
            .unwrap_or(false)
    }

    /// Cancels every observer task
    pub fn shutdown(&self) {
        let observers: Vec<Observer> = lock(&self.inner.observers).drain().map(|(_, o)| o).collect();
        for observer in observers {
            observer.task.cancel();
        }
    }

    // --- list --------------------------------------------------------------------------------

    /// Rebuilds the registry from the engine and reconciles pack states
    pub async fn list_packs(&self) -> Result<Vec<PackSummary>> {
        if let Err(e) = self.inner.registry.rebuild(self.inner.engine.as_ref()).await {
            let (reason, message) = match &e {
                BridgeError::List(source) => (source.reason.to_string(), source.message.clone()),
                other => ("other".to_string(), other.to_string()),
            };
            notify::emit(
                self.inner.sink.as_ref(),
                events::PACKS_LOAD_FAILED,
                &serde_json::json!({ "reason": reason, "message": message }),
            );
            return Err(e);
        }

        self.reconcile();

        let packs = self.packs();
        notify::emit(
            self.inner.sink.as_ref(),
            events::PACKS_LOADED,
            &PacksLoadedPayload {
                packs: packs
                    .iter()
                    .map(|p| PackEntryPayload {
                        uuid: p.uuid.clone(),
                        name: p.name.clone(),
                    })
                    .collect(),
            },
        );
        Ok(packs)
    }

    /// Brings pack states and observers in line with the registry.
    ///
    /// The registry is read while `pending` is locked: a create has always
    /// either left `pending` after indexing its pack, or is still listed there.
    fn reconcile(&self) {
        let mut to_observe = Vec::new();
        {
            let pending = lock(&self.inner.pending);
            let snapshot = self.inner.registry.snapshot();
            let mut states = lock(&self.inner.states);
            states.retain(|uuid, _| snapshot.contains_key(uuid) || pending.contains(uuid));

            for (uuid, entry) in snapshot.iter() {
                if states.contains_key(uuid) {
                    continue;
                }
                let state = match self.inner.engine.status(entry.handle) {
                    Ok(status) if status.is_complete() => PackState::Complete,
                    Ok(status) if status.download_state == DownloadState::Active => {
                        to_observe.push((uuid.clone(), entry.clone()));
                        PackState::Downloading
                    }
                    Ok(_) => PackState::Created,
                    Err(e) => {
                        log::warn!("no status for pack '{}': {}", uuid, e);
                        PackState::Created
                    }
                };
                states.insert(uuid.clone(), state);
            }
        }

        // Observers are only started for indexed packs, so checking the
        // live registry cannot cancel one started by a concurrent create
        let stale: Vec<String> = lock(&self.inner.observers)
            .keys()
            .filter(|uuid| !self.inner.registry.contains(uuid))
            .cloned()
            .collect();
        for uuid in stale {
            self.stop_observing(&uuid);
        }

        for (uuid, entry) in to_observe {
            if let Err(e) = self.ensure_observer(&uuid, entry.handle, &entry.name) {
                log::warn!("could not observe rediscovered pack '{}': {}", uuid, e);
            }
        }
    }

    pub fn submit_list_packs(&self) -> Box<dyn AsyncHandle> {
        let manager = self.clone();
        runtime::spawn(async move {
            if let Err(e) = manager.list_packs().await {
                log::debug!("submitted list finished with: {}", e);
            }
        })
    }

    // --- delete ------------------------------------------------------------------------------

    /// Deletes an indexed pack.
    ///
    /// Unknown UUIDs fail immediately without an engine call. When the
    /// engine refuses, the registry may be stale and is rebuilt (unless
    /// disabled in the configuration).
    pub async fn delete_pack(&self, uuid: &str) -> Result<()> {
        let handle = match self.inner.registry.lookup(uuid) {
            Ok(handle) => handle,
            Err(e) => {
                notify::emit(
                    self.inner.sink.as_ref(),
                    events::PACK_DELETE_FAILED,
                    &PackErrorPayload {
                        uuid: uuid.to_string(),
                        reason: "not_found".to_string(),
                        message: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        match self.inner.engine.delete_region(handle).await {
            Ok(()) => {
                self.inner.registry.remove(uuid).await;
                self.stop_observing(uuid);
                self.transition(uuid, PackEvent::DeleteSucceeded);
                log::info!("deleted pack '{}'", uuid);
                notify::emit(
                    self.inner.sink.as_ref(),
                    events::PACK_DELETED,
                    &PackDeletedPayload {
                        uuid: uuid.to_string(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                log::error!("engine refused to delete pack '{}': {}", uuid, e);
                notify::emit(
                    self.inner.sink.as_ref(),
                    events::PACK_DELETE_FAILED,
                    &PackErrorPayload::from_engine(uuid, &e),
                );
                if self.inner.config.resync_after_failed_delete {
                    if let Err(list_error) = self.list_packs().await {
                        log::warn!("resync after failed delete failed: {}", list_error);
                    }
                }
                Err(BridgeError::Delete {
                    uuid: uuid.to_string(),
                    source: e,
                })
            }
        }
    }

    pub fn submit_delete_pack(&self, uuid: impl Into<String>) -> Box<dyn AsyncHandle> {
        let manager = self.clone();
        let uuid = uuid.into();
        runtime::spawn(async move {
            if let Err(e) = manager.delete_pack(&uuid).await {
                log::debug!("submitted delete finished with: {}", e);
            }
        })
    }

    // --- state bookkeeping -------------------------------------------------------------------

    fn set_state(&self, uuid: &str, state: PackState) {
        lock(&self.inner.states).insert(uuid.to_string(), state);
    }

    fn transition(&self, uuid: &str, event: PackEvent) -> Option<PackState> {
        let mut states = lock(&self.inner.states);
        let current = states.get(uuid).copied();
        match current.and_then(|state| state.on(event)) {
            Some(next) => {
                if current != Some(next) {
                    log::debug!("pack '{}': {:?} -> {:?}", uuid, current, next);
                }
                states.insert(uuid.to_string(), next);
                Some(next)
            }
            None => {
                log::debug!("pack '{}': ignoring {:?} in state {:?}", uuid, event, current);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelSink;
    use crate::offline::memory::MemoryStorageEngine;
    use serde_json::json;

    #[test]
    fn test_request_from_props() {
        let request: CreatePackRequest = serde_json::from_value(json!({
            "uuid": "pack-1",
            "name": "Home",
            "bounds": {
                "south_west": {"lat": 40.0, "lng": -75.0},
                "north_east": {"lat": 41.0, "lng": -73.0}
            },
            "minZoom": 10,
            "maxZoom": 12,
            "styleURL": "mapbox://styles/mapbox/streets-v9"
        }))
        .unwrap();

        let definition = request.definition();
        assert_eq!(definition.min_zoom, 10);
        assert_eq!(definition.bounds, LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0));
        assert!(definition.validate().is_ok());
    }

    fn request(uuid: &str, name: &str) -> CreatePackRequest {
        CreatePackRequest {
            uuid: uuid.into(),
            name: name.into(),
            bounds: LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0),
            min_zoom: 0,
            max_zoom: 1,
            style_url: "mapbox://styles/mapbox/streets-v9".into(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reconcile_keeps_packs_created_after_the_listing() {
        let engine = MemoryStorageEngine::new();
        let (sink, _rx) = ChannelSink::new();
        let manager = OfflineManager::new(
            Arc::new(engine.clone()),
            Arc::new(sink),
            OfflineConfig::default(),
        );

        // The listing completes before the create is indexed
        manager.registry().rebuild(&engine).await.unwrap();
        manager.create_pack(request("indexed", "Indexed")).await.unwrap();

        // A create still waiting on the engine
        manager.reserve("in-flight").unwrap();
        manager.set_state("in-flight", PackState::Requested);

        manager.reconcile();

        assert_eq!(manager.pack_state("indexed"), Some(PackState::Downloading));
        assert!(manager.is_observing("indexed"));
        assert_eq!(manager.pack_state("in-flight"), Some(PackState::Requested));
    }

    #[tokio::test]
    async fn test_packs_are_sorted_by_name() {
        let engine = MemoryStorageEngine::new();
        let (sink, _rx) = ChannelSink::new();
        let config = OfflineConfig {
            activate_on_create: false,
            ..OfflineConfig::default()
        };
        let manager = OfflineManager::new(Arc::new(engine), Arc::new(sink), config);

        for (uuid, name) in [("c", "Zurich"), ("a", "Berlin"), ("b", "Berlin")] {
            manager.create_pack(request(uuid, name)).await.unwrap();
        }

        let order: Vec<String> = manager.packs().into_iter().map(|p| p.uuid).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(manager
            .packs()
            .iter()
            .all(|p| p.state == Some(PackState::Created)));
    }
}
