//! Prelude module for common maplet-bridge types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use maplet_bridge::prelude::*;`

pub use crate::core::{
    config::{AnnotationConfig, BridgeConfig, BridgeProfile, OfflineConfig},
    geo::{LatLng, LatLngBounds, TileCoord},
    settings::MapSettings,
};

pub use crate::offline::{
    engine::{EngineError, EngineErrorReason, RegionEvent, RegionEvents, StorageEngine},
    manager::{CreatePackRequest, OfflineManager, PackSummary},
    memory::{MemoryEngineConfig, MemoryStorageEngine},
    metadata::{MetadataCodec, RegionMetadata},
    region::{DownloadState, PackProgress, PackState, RegionDefinition, RegionHandle, RegionStatus},
    registry::{RegionEntry, RegionRegistry},
};

pub use crate::annotations::{
    icon::{HttpIconFetcher, Icon, IconFetcher},
    layer::AnnotationLayer,
    primitive::{Color, MarkerPrimitive, PolygonPrimitive, PolylinePrimitive, Primitive},
    translator::{AnnotationTranslator, SkippedAnnotation, Translation, TranslationSkip},
};

pub use crate::notify::{ChannelSink, LogSink, Notification, NotificationSink};
pub use crate::rendering::RenderingEngine;

pub use crate::runtime::{runtime, spawn, AsyncHandle, AsyncSpawner};

pub use crate::{BridgeError, Result};

pub use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

pub use futures::Future;
