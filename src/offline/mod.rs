//! Offline pack lifecycle
//!
//! [`manager::OfflineManager`] drives a [`engine::StorageEngine`] and keeps
//! the [`registry::RegionRegistry`] mapping caller UUIDs to engine handles.

pub mod engine;
pub mod manager;
pub mod memory;
pub mod metadata;
pub mod region;
pub mod registry;
