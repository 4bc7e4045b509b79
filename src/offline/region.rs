use crate::{core::geo::LatLngBounds, BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Opaque identity of a region inside the storage engine
///
/// The engine owns the region; the bridge only keeps this value to refer
/// to it and never frees anything through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionHandle(i64);

impl RegionHandle {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Engine-assigned identifier
    pub fn id(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the storage engine needs to download a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDefinition {
    pub bounds: LatLngBounds,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Style whose tiles are downloaded
    pub style_url: String,
}

impl RegionDefinition {
    pub fn new(bounds: LatLngBounds, min_zoom: u8, max_zoom: u8, style_url: String) -> Self {
        Self {
            bounds,
            min_zoom,
            max_zoom,
            style_url,
        }
    }

    /// Checks coordinate ranges, zoom ordering and the style reference.
    ///
    /// Corner ordering (north-east above south-west) is left to the caller.
    pub fn validate(&self) -> Result<()> {
        if !self.bounds.is_valid() {
            return Err(BridgeError::InvalidRequest(format!(
                "bounds out of range: {:?}",
                self.bounds
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(BridgeError::InvalidRequest(format!(
                "min zoom {} is greater than max zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.style_url.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("style URL is empty".into()));
        }
        Ok(())
    }

    /// Number of tiles the region covers
    pub fn tile_count(&self) -> u64 {
        self.bounds.tile_count(self.min_zoom, self.max_zoom)
    }
}

/// Whether the engine is fetching tiles for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadState {
    Inactive,
    Active,
}

/// Engine-reported download status of a region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionStatus {
    pub download_state: DownloadState,
    pub completed_resource_count: u64,
    pub completed_resource_size: u64,
    /// Negative while the engine has no estimate yet
    pub required_resource_count: i64,
    /// Whether `required_resource_count` is exact rather than an estimate
    pub required_resource_count_is_precise: bool,
}

impl RegionStatus {
    pub fn inactive() -> Self {
        Self {
            download_state: DownloadState::Inactive,
            completed_resource_count: 0,
            completed_resource_size: 0,
            required_resource_count: -1,
            required_resource_count_is_precise: false,
        }
    }

    /// All required resources are present
    pub fn is_complete(&self) -> bool {
        self.required_resource_count_is_precise
            && self.required_resource_count >= 0
            && self.completed_resource_count >= self.required_resource_count as u64
    }
}

/// Progress derived from a status update; never stored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackProgress {
    /// Percentage in [0, 100]
    pub percent: f64,
    /// Based on an exact required-resource count
    pub determinate: bool,
    pub is_complete: bool,
}

impl PackProgress {
    pub fn from_status(status: &RegionStatus) -> Self {
        let is_complete = status.is_complete();
        let required = status.required_resource_count;

        let percent = if required > 0 {
            (100.0 * status.completed_resource_count as f64 / required as f64).min(100.0)
        } else if required == 0 && is_complete {
            100.0
        } else {
            0.0
        };

        Self {
            percent,
            determinate: status.required_resource_count_is_precise && required >= 0,
            is_complete,
        }
    }
}

/// Lifecycle of a pack as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackState {
    Requested,
    Created,
    Downloading,
    Complete,
    Failed,
    Deleted,
}

/// Inputs that move a pack between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEvent {
    CreateSucceeded,
    CreateFailed,
    Activated,
    Deactivated,
    StatusComplete,
    /// A download error; terminal errors end the download
    DownloadError { terminal: bool },
    DeleteSucceeded,
}

impl PackState {
    /// Next state for `event`, or `None` when the event does not apply.
    ///
    /// A download that failed can be re-activated; a failed create cannot,
    /// since the pack never reached the registry.
    pub fn on(self, event: PackEvent) -> Option<PackState> {
        use PackEvent::*;
        use PackState::*;

        match (self, event) {
            (Requested, CreateSucceeded) => Some(Created),
            (Requested, CreateFailed) => Some(Failed),
            (Created, Activated) | (Failed, Activated) => Some(Downloading),
            (Downloading, Activated) => Some(Downloading),
            (Downloading, Deactivated) => Some(Created),
            (Downloading, StatusComplete) => Some(Complete),
            (Downloading, DownloadError { terminal: false }) => Some(Downloading),
            (Downloading, DownloadError { terminal: true }) => Some(Failed),
            (Created | Downloading | Complete | Failed, DeleteSucceeded) => Some(Deleted),
            _ => None,
        }
    }
}
