//! Metadata blob attached to every stored region
//!
//! The blob is a UTF-8 JSON object `{"name": ..., "uuid": ...}`. Unknown
//! keys are ignored on decode so newer writers stay readable.

use crate::core::constants::DEFAULT_MAX_METADATA_BYTES;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Identity stored alongside a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub name: String,
    pub uuid: String,
}

impl RegionMetadata {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    /// Identity synthesized from the engine's region id when the stored record is unreadable
    pub fn fallback(region_id: i64, name_prefix: &str) -> Self {
        Self {
            name: format!("{}{}", name_prefix, region_id),
            uuid: region_id.to_string(),
        }
    }
}

/// Encodes and decodes region metadata blobs
#[derive(Debug, Clone)]
pub struct MetadataCodec {
    max_bytes: usize,
}

impl MetadataCodec {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn encode(&self, name: &str, uuid: &str) -> Result<Vec<u8>> {
        if uuid.trim().is_empty() {
            return Err(BridgeError::Encoding("uuid is empty".into()));
        }
        if name.contains('\0') || uuid.contains('\0') {
            return Err(BridgeError::Encoding("metadata contains a NUL character".into()));
        }

        let bytes = serde_json::to_vec(&RegionMetadata::new(name, uuid))
            .map_err(|e| BridgeError::Encoding(e.to_string()))?;

        if bytes.len() > self.max_bytes {
            return Err(BridgeError::Encoding(format!(
                "metadata is {} bytes, limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }
        Ok(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<RegionMetadata> {
        if bytes.is_empty() {
            return Err(BridgeError::Decoding("metadata is empty".into()));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| BridgeError::Decoding(format!("metadata is not UTF-8: {}", e)))?;
        let metadata: RegionMetadata =
            serde_json::from_str(text).map_err(|e| BridgeError::Decoding(e.to_string()))?;

        if metadata.uuid.trim().is_empty() {
            return Err(BridgeError::Decoding("uuid is empty".into()));
        }
        Ok(metadata)
    }

    /// Decodes `bytes`, synthesizing an identity from `region_id` on failure.
    ///
    /// Never fails: one corrupt record must not keep other packs from loading.
    pub fn decode_or_fallback(
        &self,
        bytes: &[u8],
        region_id: i64,
        name_prefix: &str,
    ) -> RegionMetadata {
        match self.decode(bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!(
                    "unreadable metadata for region {}, using fallback identity: {}",
                    region_id,
                    e
                );
                RegionMetadata::fallback(region_id, name_prefix)
            }
        }
    }
}

impl Default for MetadataCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_METADATA_BYTES)
    }
}
