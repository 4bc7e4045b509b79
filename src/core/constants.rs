//! Core constants shared by the offline and annotation halves of the bridge.
//! Keeping them in a single place makes it easier to keep the host UI layer in sync.

/// Upper bound for an encoded metadata blob.
pub const DEFAULT_MAX_METADATA_BYTES: usize = 4096;

/// Prefix of the display name synthesized for packs whose metadata is unreadable.
pub const DEFAULT_FALLBACK_NAME_PREFIX: &str = "Region ";

/// Minimum vertex count for a polyline annotation.
pub const MIN_POLYLINE_POINTS: usize = 2;

/// Minimum vertex count for a polygon annotation.
pub const MIN_POLYGON_POINTS: usize = 3;

/// Default number of decoded marker icons kept in memory.
pub const DEFAULT_ICON_CACHE_CAPACITY: usize = 64;

/// Default timeout for a single icon download.
pub const DEFAULT_ICON_FETCH_TIMEOUT_MS: u64 = 10_000;

/// User agent sent when fetching marker icons.
pub const DEFAULT_USER_AGENT: &str = "maplet-bridge/0.1.0";

/// Notification names delivered to the host UI layer.
pub mod events {
    /// A pack was created by the storage engine and indexed.
    pub const PACK_CREATED: &str = "offlinePackCreated";

    /// A status update for a downloading pack.
    pub const PACK_PROGRESS: &str = "offlinePackProgress";

    /// The storage engine reported a download error for a pack.
    pub const PACK_ERROR: &str = "offlinePackError";

    /// A pack would exceed the storage engine's tile-count limit.
    pub const TILE_LIMIT_EXCEEDED: &str = "offlineTileLimitExceeded";

    /// The registry was rebuilt from persisted storage.
    pub const PACKS_LOADED: &str = "offlinePacksLoaded";

    /// Listing persisted packs failed; the previous registry is kept.
    pub const PACKS_LOAD_FAILED: &str = "offlinePacksLoadFailed";

    /// The storage engine refused to create a pack.
    pub const PACK_CREATE_FAILED: &str = "offlinePackCreateFailed";

    /// A pack was removed from storage and from the registry.
    pub const PACK_DELETED: &str = "offlinePackDeleted";

    /// Deleting a pack failed.
    pub const PACK_DELETE_FAILED: &str = "offlinePackDeleteFailed";
}
