//! In-memory index from pack UUID to engine region handle
//!
//! Readers take a cheap clone of an immutable snapshot. Writers are
//! serialized by an async mutex and publish a fresh snapshot, so a
//! rebuild is seen either entirely or not at all.

use crate::offline::engine::StorageEngine;
use crate::offline::metadata::MetadataCodec;
use crate::offline::region::RegionHandle;
use crate::prelude::HashMap;
use crate::{BridgeError, Result};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// A pack known to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEntry {
    pub handle: RegionHandle,
    pub name: String,
}

impl RegionEntry {
    pub fn new(handle: RegionHandle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }
}

/// Immutable view of the registry at one point in time
pub type RegistrySnapshot = Arc<HashMap<String, RegionEntry>>;

pub struct RegionRegistry {
    snapshot: RwLock<RegistrySnapshot>,
    /// Held by every writer, across the engine listing in `rebuild`
    writer: Mutex<()>,
    codec: MetadataCodec,
    fallback_name_prefix: String,
}

impl RegionRegistry {
    pub fn new(codec: MetadataCodec, fallback_name_prefix: impl Into<String>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::default())),
            writer: Mutex::new(()),
            codec,
            fallback_name_prefix: fallback_name_prefix.into(),
        }
    }

    /// Current contents
    pub fn snapshot(&self) -> RegistrySnapshot {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn publish(&self, next: HashMap<String, RegionEntry>) {
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn lookup(&self, uuid: &str) -> Result<RegionHandle> {
        self.get(uuid)
            .map(|entry| entry.handle)
            .ok_or_else(|| BridgeError::NotFound(uuid.to_string()))
    }

    pub fn get(&self, uuid: &str) -> Option<RegionEntry> {
        self.snapshot().get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.snapshot().contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index a pack, replacing any previous entry for the same UUID
    pub async fn insert(&self, uuid: impl Into<String>, entry: RegionEntry) -> Option<RegionEntry> {
        let _writer = self.writer.lock().await;
        let mut next = (*self.snapshot()).clone();
        let previous = next.insert(uuid.into(), entry);
        self.publish(next);
        previous
    }

    pub async fn remove(&self, uuid: &str) -> Option<RegionEntry> {
        let _writer = self.writer.lock().await;
        let mut next = (*self.snapshot()).clone();
        let removed = next.remove(uuid);
        if removed.is_some() {
            self.publish(next);
        }
        removed
    }

    /// Replaces the whole index with what the engine has persisted.
    ///
    /// Regions with unreadable metadata are indexed under a fallback
    /// identity. When the listing itself fails the previous snapshot is
    /// kept and the engine error is returned.
    pub async fn rebuild(&self, engine: &dyn StorageEngine) -> Result<RegistrySnapshot> {
        let _writer = self.writer.lock().await;

        let handles = engine.list_regions().await.map_err(|e| {
            log::error!("listing offline regions failed: {}", e);
            BridgeError::List(e)
        })?;

        let mut next: HashMap<String, RegionEntry> = HashMap::default();
        for handle in handles {
            let bytes = engine.metadata(handle).unwrap_or_else(|e| {
                log::warn!("no metadata for region {}: {}", handle, e);
                Vec::new()
            });
            let region_id = engine.region_id(handle);
            let mut metadata =
                self.codec
                    .decode_or_fallback(&bytes, region_id, &self.fallback_name_prefix);

            if next.contains_key(&metadata.uuid) {
                log::warn!(
                    "region {} repeats uuid '{}', indexing it under its fallback identity",
                    handle,
                    metadata.uuid
                );
                let fallback = crate::offline::metadata::RegionMetadata::fallback(
                    region_id,
                    &self.fallback_name_prefix,
                );
                metadata.uuid = fallback.uuid;
            }

            next.insert(metadata.uuid, RegionEntry::new(handle, metadata.name));
        }

        log::info!("registry rebuilt with {} offline regions", next.len());
        self.publish(next);
        Ok(self.snapshot())
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new(
            MetadataCodec::default(),
            crate::core::constants::DEFAULT_FALLBACK_NAME_PREFIX,
        )
    }
}
