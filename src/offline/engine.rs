//! Storage engine capability
//!
//! The storage engine owns persisted regions and the tile downloads. Every
//! call may complete on a thread the bridge does not control; the bridge
//! serializes its own state changes.

use crate::offline::region::{DownloadState, RegionDefinition, RegionHandle, RegionStatus};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Category of an engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineErrorReason {
    /// The engine could not reach the network
    Connection,
    /// A tile or style server answered with an error
    Server,
    /// A requested resource or region does not exist
    NotFound,
    Other,
}

impl std::fmt::Display for EngineErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineErrorReason::Connection => write!(f, "connection"),
            EngineErrorReason::Server => write!(f, "server"),
            EngineErrorReason::NotFound => write!(f, "not_found"),
            EngineErrorReason::Other => write!(f, "other"),
        }
    }
}

/// A failure reported by the storage engine, surfaced verbatim
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{reason}: {message}")]
pub struct EngineError {
    pub reason: EngineErrorReason,
    pub message: String,
}

impl EngineError {
    pub fn new(reason: EngineErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(EngineErrorReason::Other, message)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Observation of a region while it is being watched
#[derive(Debug, Clone, PartialEq)]
pub enum RegionEvent {
    Status(RegionStatus),
    Error(EngineError),
    /// The region needs more tiles than the engine allows; downloading stops
    TileCountLimitExceeded(u64),
}

/// Stream of events for one observed region; dropping it ends the observation
pub type RegionEvents = BoxStream<'static, RegionEvent>;

/// Asynchronous storage engine holding offline regions
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Persist a new region and return its handle
    async fn create_region(
        &self,
        definition: RegionDefinition,
        metadata: Vec<u8>,
    ) -> EngineResult<RegionHandle>;

    /// Every region currently persisted
    async fn list_regions(&self) -> EngineResult<Vec<RegionHandle>>;

    /// Remove a region and its downloaded resources
    async fn delete_region(&self, handle: RegionHandle) -> EngineResult<()>;

    /// Start watching a region; events keep flowing until the stream is dropped
    fn observe_region(&self, handle: RegionHandle) -> EngineResult<RegionEvents>;

    /// Start or stop fetching tiles for a region
    fn set_download_state(&self, handle: RegionHandle, state: DownloadState) -> EngineResult<()>;

    /// Latest known status of a region
    fn status(&self, handle: RegionHandle) -> EngineResult<RegionStatus>;

    /// Metadata blob stored with a region
    fn metadata(&self, handle: RegionHandle) -> EngineResult<Vec<u8>>;

    /// Engine-side identifier of a region
    fn region_id(&self, handle: RegionHandle) -> i64 {
        handle.id()
    }
}
