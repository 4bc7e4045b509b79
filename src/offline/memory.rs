//! In-process reference storage engine
//!
//! Keeps regions in memory, optionally persisting them to a snapshot file,
//! and can simulate tile downloads on a timer. It also counts every call
//! and can be told to fail the next create/list/delete, which is what the
//! test-suite and the demo app drive the manager with.

use crate::offline::engine::{
    EngineError, EngineErrorReason, EngineResult, RegionEvent, RegionEvents, StorageEngine,
};
use crate::offline::region::{DownloadState, RegionDefinition, RegionHandle, RegionStatus};
use crate::prelude::HashMap;
use crate::runtime::{self, AsyncHandle};
use crate::Result;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Behaviour of the simulated downloads
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEngineConfig {
    /// Advance active downloads on a timer
    pub simulate_downloads: bool,
    pub tick_interval: Duration,
    pub tiles_per_tick: u64,
    /// Regions needing more tiles than this stop with a limit event
    pub tile_count_limit: u64,
    pub average_tile_bytes: u64,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            simulate_downloads: true,
            tick_interval: Duration::from_millis(50),
            tiles_per_tick: 25,
            tile_count_limit: 6000,
            average_tile_bytes: 20_000,
        }
    }
}

impl MemoryEngineConfig {
    /// No timers: status changes only happen through `push_*`
    pub fn manual() -> Self {
        Self {
            simulate_downloads: false,
            ..Self::default()
        }
    }

    pub fn for_testing() -> Self {
        Self {
            tick_interval: Duration::from_millis(5),
            tiles_per_tick: 10,
            ..Self::default()
        }
    }
}

/// Number of calls the engine has received, per operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineCalls {
    pub create: usize,
    pub list: usize,
    pub delete: usize,
    pub observe: usize,
    pub set_download_state: usize,
    pub status: usize,
    pub metadata: usize,
}

impl EngineCalls {
    pub fn total(&self) -> usize {
        self.create
            + self.list
            + self.delete
            + self.observe
            + self.set_download_state
            + self.status
            + self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRegion {
    definition: RegionDefinition,
    metadata: Vec<u8>,
    status: RegionStatus,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineSnapshot {
    next_id: i64,
    regions: BTreeMap<i64, StoredRegion>,
}

#[derive(Default)]
struct PendingFailures {
    create: Option<EngineError>,
    list: Option<EngineError>,
    delete: Option<EngineError>,
}

#[derive(Default)]
struct EngineState {
    next_id: i64,
    regions: BTreeMap<i64, StoredRegion>,
    observers: HashMap<i64, Vec<UnboundedSender<RegionEvent>>>,
    downloads: HashMap<i64, Box<dyn AsyncHandle>>,
    failures: PendingFailures,
    calls: EngineCalls,
    /// Bumped for every serialized snapshot
    revision: u64,
}

impl EngineState {
    fn broadcast(&mut self, id: i64, event: RegionEvent) {
        if let Some(senders) = self.observers.get_mut(&id) {
            senders.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
        }
    }

    fn region(&self, handle: RegionHandle) -> EngineResult<&StoredRegion> {
        self.regions.get(&handle.id()).ok_or_else(|| missing(handle))
    }

    fn region_mut(&mut self, handle: RegionHandle) -> EngineResult<&mut StoredRegion> {
        self.regions
            .get_mut(&handle.id())
            .ok_or_else(|| missing(handle))
    }
}

fn missing(handle: RegionHandle) -> EngineError {
    EngineError::new(
        EngineErrorReason::NotFound,
        format!("no region with id {}", handle),
    )
}

/// A serialized snapshot waiting to be written outside the state lock
struct SnapshotWrite {
    revision: u64,
    bytes: Vec<u8>,
}

struct EngineInner {
    state: Mutex<EngineState>,
    config: MemoryEngineConfig,
    path: Option<PathBuf>,
    /// Revision of the snapshot currently on disk
    written: Mutex<u64>,
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serializes the regions while the state lock is held
    fn snapshot(&self, state: &mut EngineState) -> Option<SnapshotWrite> {
        if self.path.is_none() {
            return None;
        }
        let snapshot = EngineSnapshot {
            next_id: state.next_id,
            regions: state.regions.clone(),
        };
        match bincode::serialize(&snapshot) {
            Ok(bytes) => {
                state.revision += 1;
                Some(SnapshotWrite {
                    revision: state.revision,
                    bytes,
                })
            }
            Err(e) => {
                log::error!("failed to serialize offline regions: {}", e);
                None
            }
        }
    }

    /// Writes a snapshot taken by [`snapshot`](Self::snapshot) unless a newer
    /// one is already on disk. Must be called without the state lock.
    fn write_snapshot(&self, write: Option<SnapshotWrite>) {
        let (Some(write), Some(path)) = (write, &self.path) else {
            return;
        };
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if write.revision <= *written {
            log::trace!("skipping snapshot {}, {} is already on disk", write.revision, *written);
            return;
        }
        match std::fs::write(path, &write.bytes) {
            Ok(()) => *written = write.revision,
            Err(e) => log::error!("failed to persist offline regions to {}: {}", path.display(), e),
        }
    }
}

/// Storage engine keeping regions in process memory
#[derive(Clone)]
pub struct MemoryStorageEngine {
    inner: Arc<EngineInner>,
}

impl MemoryStorageEngine {
    /// Engine without simulated downloads or persistence
    pub fn new() -> Self {
        Self::with_config(MemoryEngineConfig::manual())
    }

    pub fn with_config(config: MemoryEngineConfig) -> Self {
        Self::build(config, None, EngineSnapshot::default())
    }

    /// Engine persisted to `path`, restoring any regions saved there earlier.
    ///
    /// Restored regions come back inactive; downloads do not resume on
    /// their own after a restart.
    pub fn open(path: impl AsRef<Path>, config: MemoryEngineConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut snapshot = if path.exists() {
            let bytes = std::fs::read(&path)?;
            bincode::deserialize::<EngineSnapshot>(&bytes)?
        } else {
            EngineSnapshot::default()
        };

        for region in snapshot.regions.values_mut() {
            region.status.download_state = DownloadState::Inactive;
        }
        log::info!(
            "opened offline store {} with {} regions",
            path.display(),
            snapshot.regions.len()
        );
        Ok(Self::build(config, Some(path), snapshot))
    }

    fn build(config: MemoryEngineConfig, path: Option<PathBuf>, snapshot: EngineSnapshot) -> Self {
        let state = EngineState {
            next_id: snapshot.next_id,
            regions: snapshot.regions,
            ..EngineState::default()
        };
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(state),
                config,
                path,
                written: Mutex::new(0),
            }),
        }
    }

    /// Stores a region directly, bypassing call counting and failure injection
    pub fn insert_region(&self, definition: RegionDefinition, metadata: Vec<u8>) -> RegionHandle {
        let (handle, write) = {
            let mut state = self.inner.lock();
            let handle = Self::allocate(&mut state, definition, metadata);
            (handle, self.inner.snapshot(&mut state))
        };
        self.inner.write_snapshot(write);
        handle
    }

    fn allocate(
        state: &mut EngineState,
        definition: RegionDefinition,
        metadata: Vec<u8>,
    ) -> RegionHandle {
        state.next_id += 1;
        let id = state.next_id;
        state.regions.insert(
            id,
            StoredRegion {
                definition,
                metadata,
                status: RegionStatus::inactive(),
            },
        );
        RegionHandle::new(id)
    }

    pub fn fail_next_create(&self, error: EngineError) {
        self.inner.lock().failures.create = Some(error);
    }

    pub fn fail_next_list(&self, error: EngineError) {
        self.inner.lock().failures.list = Some(error);
    }

    pub fn fail_next_delete(&self, error: EngineError) {
        self.inner.lock().failures.delete = Some(error);
    }

    pub fn calls(&self) -> EngineCalls {
        self.inner.lock().calls
    }

    pub fn region_count(&self) -> usize {
        self.inner.lock().regions.len()
    }

    pub fn contains(&self, handle: RegionHandle) -> bool {
        self.inner.lock().regions.contains_key(&handle.id())
    }

    /// Records a status for a region and delivers it to observers
    pub fn push_status(&self, handle: RegionHandle, status: RegionStatus) -> EngineResult<()> {
        let mut state = self.inner.lock();
        state.region_mut(handle)?.status = status;
        state.broadcast(handle.id(), RegionEvent::Status(status));
        Ok(())
    }

    /// Delivers a download error to observers
    pub fn push_error(&self, handle: RegionHandle, error: EngineError) -> EngineResult<()> {
        let mut state = self.inner.lock();
        state.region(handle)?;
        state.broadcast(handle.id(), RegionEvent::Error(error));
        Ok(())
    }

    /// Deactivates a region and reports that it exceeds the tile limit
    pub fn push_tile_limit(&self, handle: RegionHandle, limit: u64) -> EngineResult<()> {
        let mut state = self.inner.lock();
        state.region_mut(handle)?.status.download_state = DownloadState::Inactive;
        state.broadcast(handle.id(), RegionEvent::TileCountLimitExceeded(limit));
        Ok(())
    }

    fn start_download(&self, state: &mut EngineState, id: i64) {
        if state
            .downloads
            .get(&id)
            .map(|task| !task.is_finished())
            .unwrap_or(false)
        {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let task = runtime::spawn(async move {
            simulate_download(inner, id).await;
        });
        state.downloads.insert(id, task);
    }
}

impl Default for MemoryStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances one region's download until it completes, is paused, is
/// deleted or hits the tile limit
async fn simulate_download(inner: Arc<EngineInner>, id: i64) {
    loop {
        let (running, write) = advance_download(&inner, id);
        inner.write_snapshot(write);
        if !running {
            break;
        }
        tokio::time::sleep(inner.config.tick_interval).await;
    }
}

/// One tick of a simulated download; returns whether it should keep running
fn advance_download(inner: &EngineInner, id: i64) -> (bool, Option<SnapshotWrite>) {
    let config = &inner.config;
    let mut state = inner.lock();
    let Some(region) = state.regions.get_mut(&id) else {
        return (false, None);
    };
    if region.status.download_state != DownloadState::Active {
        return (false, None);
    }

    let required = region.definition.tile_count();
    if required > config.tile_count_limit {
        region.status.download_state = DownloadState::Inactive;
        log::warn!(
            "region {} needs {} tiles, limit is {}",
            id,
            required,
            config.tile_count_limit
        );
        state.broadcast(id, RegionEvent::TileCountLimitExceeded(config.tile_count_limit));
        return (false, inner.snapshot(&mut state));
    }

    let status = &mut region.status;
    status.required_resource_count = required as i64;
    status.required_resource_count_is_precise = true;
    status.completed_resource_count =
        (status.completed_resource_count + config.tiles_per_tick).min(required);
    status.completed_resource_size = status.completed_resource_count * config.average_tile_bytes;

    let complete = status.is_complete();
    if complete {
        status.download_state = DownloadState::Inactive;
    }
    let snapshot = *status;
    state.broadcast(id, RegionEvent::Status(snapshot));

    if complete {
        log::info!("region {} finished downloading {} tiles", id, required);
        return (false, inner.snapshot(&mut state));
    }
    (true, None)
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn create_region(
        &self,
        definition: RegionDefinition,
        metadata: Vec<u8>,
    ) -> EngineResult<RegionHandle> {
        let (handle, write) = {
            let mut state = self.inner.lock();
            state.calls.create += 1;
            if let Some(error) = state.failures.create.take() {
                return Err(error);
            }
            let handle = Self::allocate(&mut state, definition, metadata);
            (handle, self.inner.snapshot(&mut state))
        };
        self.inner.write_snapshot(write);
        log::debug!("created region {}", handle);
        Ok(handle)
    }

    async fn list_regions(&self) -> EngineResult<Vec<RegionHandle>> {
        let mut state = self.inner.lock();
        state.calls.list += 1;
        if let Some(error) = state.failures.list.take() {
            return Err(error);
        }
        Ok(state.regions.keys().copied().map(RegionHandle::new).collect())
    }

    async fn delete_region(&self, handle: RegionHandle) -> EngineResult<()> {
        let write = {
            let mut state = self.inner.lock();
            state.calls.delete += 1;
            if let Some(error) = state.failures.delete.take() {
                return Err(error);
            }
            if state.regions.remove(&handle.id()).is_none() {
                return Err(missing(handle));
            }
            if let Some(task) = state.downloads.remove(&handle.id()) {
                task.cancel();
            }
            // Dropping the senders ends every observer stream
            state.observers.remove(&handle.id());
            self.inner.snapshot(&mut state)
        };
        self.inner.write_snapshot(write);
        log::debug!("deleted region {}", handle);
        Ok(())
    }

    fn observe_region(&self, handle: RegionHandle) -> EngineResult<RegionEvents> {
        let mut state = self.inner.lock();
        state.calls.observe += 1;
        state.region(handle)?;
        let (tx, rx) = unbounded();
        state.observers.entry(handle.id()).or_default().push(tx);
        Ok(rx.boxed())
    }

    fn set_download_state(&self, handle: RegionHandle, download_state: DownloadState) -> EngineResult<()> {
        let write = {
            let mut state = self.inner.lock();
            state.calls.set_download_state += 1;
            let region = state.region_mut(handle)?;
            region.status.download_state = download_state;
            let status = region.status;
            state.broadcast(handle.id(), RegionEvent::Status(status));

            match download_state {
                DownloadState::Active if self.inner.config.simulate_downloads => {
                    self.start_download(&mut state, handle.id());
                }
                DownloadState::Active => {}
                DownloadState::Inactive => {
                    if let Some(task) = state.downloads.remove(&handle.id()) {
                        task.cancel();
                    }
                }
            }
            self.inner.snapshot(&mut state)
        };
        self.inner.write_snapshot(write);
        Ok(())
    }

    fn status(&self, handle: RegionHandle) -> EngineResult<RegionStatus> {
        let mut state = self.inner.lock();
        state.calls.status += 1;
        Ok(state.region(handle)?.status)
    }

    fn metadata(&self, handle: RegionHandle) -> EngineResult<Vec<u8>> {
        let mut state = self.inner.lock();
        state.calls.metadata += 1;
        Ok(state.region(handle)?.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::LatLngBounds;

    fn definition(max_zoom: u8) -> RegionDefinition {
        RegionDefinition::new(
            LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0),
            0,
            max_zoom,
            "mapbox://styles/mapbox/streets-v9".into(),
        )
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let engine = MemoryStorageEngine::new();
        let handle = engine.create_region(definition(2), b"meta".to_vec()).await.unwrap();

        assert_eq!(engine.list_regions().await.unwrap(), vec![handle]);
        assert_eq!(engine.metadata(handle).unwrap(), b"meta".to_vec());

        engine.delete_region(handle).await.unwrap();
        assert!(engine.list_regions().await.unwrap().is_empty());
        assert_eq!(
            engine.delete_region(handle).await.unwrap_err().reason,
            EngineErrorReason::NotFound
        );
        assert_eq!(engine.calls().delete, 2);
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let engine = MemoryStorageEngine::new();
        engine.fail_next_create(EngineError::other("disk full"));

        assert!(engine.create_region(definition(2), Vec::new()).await.is_err());
        assert!(engine.create_region(definition(2), Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_observers_receive_pushed_events() {
        let engine = MemoryStorageEngine::new();
        let handle = engine.insert_region(definition(2), Vec::new());
        let mut events = engine.observe_region(handle).unwrap();

        let mut status = RegionStatus::inactive();
        status.required_resource_count = 10;
        engine.push_status(handle, status).unwrap();
        engine.push_error(handle, EngineError::other("timeout")).unwrap();

        assert_eq!(events.next().await, Some(RegionEvent::Status(status)));
        assert!(matches!(events.next().await, Some(RegionEvent::Error(_))));

        engine.delete_region(handle).await.unwrap();
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_simulated_download_completes() {
        let engine = MemoryStorageEngine::with_config(MemoryEngineConfig::for_testing());
        let handle = engine.insert_region(definition(3), Vec::new());
        let mut events = engine.observe_region(handle).unwrap();

        engine.set_download_state(handle, DownloadState::Active).unwrap();

        let mut last = None;
        while let Some(event) = events.next().await {
            if let RegionEvent::Status(status) = event {
                if status.is_complete() {
                    last = Some(status);
                    break;
                }
            }
        }

        let status = last.unwrap();
        assert_eq!(status.required_resource_count as u64, definition(3).tile_count());
        assert_eq!(engine.status(handle).unwrap().download_state, DownloadState::Inactive);
    }

    #[tokio::test]
    async fn test_simulated_download_respects_tile_limit() {
        let config = MemoryEngineConfig {
            tile_count_limit: 3,
            ..MemoryEngineConfig::for_testing()
        };
        let engine = MemoryStorageEngine::with_config(config);
        let handle = engine.insert_region(definition(4), Vec::new());
        let mut events = engine.observe_region(handle).unwrap();

        engine.set_download_state(handle, DownloadState::Active).unwrap();

        loop {
            match events.next().await {
                Some(RegionEvent::TileCountLimitExceeded(limit)) => {
                    assert_eq!(limit, 3);
                    break;
                }
                Some(_) => continue,
                None => panic!("stream ended without a limit event"),
            }
        }
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "maplet-bridge-memory-{}.bin",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let handle = {
            let engine = MemoryStorageEngine::open(&path, MemoryEngineConfig::manual()).unwrap();
            engine.create_region(definition(2), b"kept".to_vec()).await.unwrap()
        };

        let reopened = MemoryStorageEngine::open(&path, MemoryEngineConfig::manual()).unwrap();
        assert_eq!(reopened.list_regions().await.unwrap(), vec![handle]);
        assert_eq!(reopened.metadata(handle).unwrap(), b"kept".to_vec());

        // New handles never reuse persisted ids
        let next = reopened.create_region(definition(2), Vec::new()).await.unwrap();
        assert!(next.id() > handle.id());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_older_snapshot_never_overwrites_newer() {
        let path = std::env::temp_dir().join(format!(
            "maplet-bridge-revisions-{}.bin",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let engine = MemoryStorageEngine::open(&path, MemoryEngineConfig::manual()).unwrap();
        let stale = {
            let mut state = engine.inner.lock();
            engine.inner.snapshot(&mut state)
        };
        let handle = engine.create_region(definition(2), b"kept".to_vec()).await.unwrap();

        // Written after the newer snapshot, as a slow writer would
        engine.inner.write_snapshot(stale);

        let reopened = MemoryStorageEngine::open(&path, MemoryEngineConfig::manual()).unwrap();
        assert_eq!(reopened.list_regions().await.unwrap(), vec![handle]);

        let _ = std::fs::remove_file(&path);
    }
}
