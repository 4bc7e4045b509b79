//! Configuration system for the offline pack manager and annotation layer
//!
//! The bridge is built from an explicit configuration snapshot. Nothing in
//! the core reads ambient globals; hosts construct a [`BridgeConfig`] (or a
//! preset) once and hand it to the components that need it.

use crate::core::constants::{
    DEFAULT_FALLBACK_NAME_PREFIX, DEFAULT_ICON_CACHE_CAPACITY, DEFAULT_ICON_FETCH_TIMEOUT_MS,
    DEFAULT_MAX_METADATA_BYTES, DEFAULT_USER_AGENT, MIN_POLYGON_POINTS, MIN_POLYLINE_POINTS,
};
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeProfile {
    Balanced,
    Strict,
    Lenient,
    Custom(BridgeConfig),
}

impl BridgeProfile {
    pub fn resolve(&self) -> BridgeConfig {
        match self {
            Self::Balanced => BridgeConfig::default(),
            Self::Strict => BridgeConfig {
                annotations: AnnotationConfig {
                    clamp_alpha: false,
                    ..AnnotationConfig::default()
                },
                ..BridgeConfig::default()
            },
            Self::Lenient => BridgeConfig {
                offline: OfflineConfig {
                    reject_duplicate_uuids: false,
                    ..OfflineConfig::default()
                },
                annotations: AnnotationConfig {
                    min_polygon_points: MIN_POLYLINE_POINTS,
                    validate_coordinates: false,
                    ..AnnotationConfig::default()
                },
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

/// Top level configuration handed to the bridge components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub offline: OfflineConfig,
    pub annotations: AnnotationConfig,
}

impl BridgeConfig {
    /// Configuration used by the test-suite: no background listing on start
    /// and short icon timeouts.
    pub fn for_testing() -> Self {
        Self {
            offline: OfflineConfig {
                list_on_start: false,
                ..OfflineConfig::default()
            },
            annotations: AnnotationConfig {
                icon_fetch_timeout_ms: 500,
                icon_cache_capacity: 4,
                ..AnnotationConfig::default()
            },
        }
    }

    /// Rejects configurations the components cannot honour
    pub fn validate(&self) -> Result<()> {
        self.offline.validate()?;
        self.annotations.validate()
    }

    /// Parses a configuration from JSON, filling omitted fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Tuning for the offline pack lifecycle controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Display name prefix for packs whose metadata cannot be decoded
    pub fallback_name_prefix: String,
    /// Refuse a create request whose UUID is already indexed or in flight
    pub reject_duplicate_uuids: bool,
    /// Rebuild the registry after the engine rejects a delete
    pub resync_after_failed_delete: bool,
    /// Start downloading as soon as the engine has created a pack
    pub activate_on_create: bool,
    /// List persisted packs when the manager starts
    pub list_on_start: bool,
    /// Largest metadata blob the codec will produce
    pub max_metadata_bytes: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            fallback_name_prefix: DEFAULT_FALLBACK_NAME_PREFIX.to_string(),
            reject_duplicate_uuids: true,
            resync_after_failed_delete: true,
            activate_on_create: true,
            list_on_start: true,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
        }
    }
}

impl OfflineConfig {
    fn validate(&self) -> Result<()> {
        if self.max_metadata_bytes == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_metadata_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Tuning for annotation translation and icon loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Fewest vertices a polyline may have before it is skipped
    pub min_polyline_points: usize,
    /// Fewest vertices a polygon may have before it is skipped
    pub min_polygon_points: usize,
    /// Skip items whose coordinates fall outside latitude/longitude ranges
    pub validate_coordinates: bool,
    /// Clamp `alpha` into [0, 1] instead of skipping the item
    pub clamp_alpha: bool,
    /// Number of decoded icons kept in memory
    pub icon_cache_capacity: usize,
    /// Timeout for a single icon download
    pub icon_fetch_timeout_ms: u64,
    /// User agent for icon downloads
    pub user_agent: String,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            min_polyline_points: MIN_POLYLINE_POINTS,
            min_polygon_points: MIN_POLYGON_POINTS,
            validate_coordinates: true,
            clamp_alpha: true,
            icon_cache_capacity: DEFAULT_ICON_CACHE_CAPACITY,
            icon_fetch_timeout_ms: DEFAULT_ICON_FETCH_TIMEOUT_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AnnotationConfig {
    pub fn icon_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.icon_fetch_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.min_polyline_points < 2 {
            return Err(BridgeError::InvalidConfig(
                "a polyline needs at least 2 points".into(),
            ));
        }
        if self.min_polygon_points < 2 {
            return Err(BridgeError::InvalidConfig(
                "a polygon needs at least 2 points".into(),
            ));
        }
        Ok(())
    }
}
