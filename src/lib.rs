//! # maplet-bridge
//!
//! The engine-facing core behind a declarative map view.
//!
//! The host UI layer forwards property changes into this crate; it owns
//! the two pieces with real behaviour:
//!
//! - the offline pack lifecycle ([`offline`]): creating, observing,
//!   listing and deleting downloadable tile regions against an
//!   asynchronous storage engine, keyed by caller-supplied UUIDs;
//! - the annotation translator ([`annotations`]): turning loosely-typed
//!   point/polyline/polygon descriptors into renderer primitives.
//!
//! Everything else (camera, gestures, style switching) is recorded in
//! [`core::settings::MapSettings`] and passed through.

pub mod annotations;
pub mod core;
pub mod notify;
pub mod offline;
pub mod prelude;
pub mod rendering;
pub mod runtime;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{AnnotationConfig, BridgeConfig, OfflineConfig},
    geo::{LatLng, LatLngBounds, TileCoord},
    settings::MapSettings,
};

pub use offline::{
    engine::{EngineError, EngineErrorReason, StorageEngine},
    manager::OfflineManager,
    memory::MemoryStorageEngine,
    metadata::{MetadataCodec, RegionMetadata},
    region::{DownloadState, PackProgress, PackState, RegionDefinition, RegionHandle},
    registry::RegionRegistry,
};

pub use annotations::{
    layer::AnnotationLayer,
    primitive::{Color, Primitive},
    translator::{AnnotationTranslator, Translation, TranslationSkip},
};

pub use notify::{Notification, NotificationSink};
pub use rendering::RenderingEngine;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Metadata encoding error: {0}")]
    Encoding(String),

    #[error("Metadata decoding error: {0}")]
    Decoding(String),

    #[error("Listing packs failed: {0}")]
    List(EngineError),

    #[error("Creating pack '{uuid}' failed: {source}")]
    Create { uuid: String, source: EngineError },

    #[error("Deleting pack '{uuid}' failed: {source}")]
    Delete { uuid: String, source: EngineError },

    #[error("Download of pack '{uuid}' failed: {source}")]
    Download { uuid: String, source: EngineError },

    #[error("No pack with uuid '{0}'")]
    NotFound(String),

    #[error("A pack with uuid '{0}' already exists")]
    DuplicateUuid(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image error: {0}")]
    Image(String),
}

/// Error type alias for convenience
pub type Error = BridgeError;
