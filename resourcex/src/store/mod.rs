//! Storage backends: a byte-addressable blob store and a manifest store.
//!
//! Both come in two flavors: an in-memory implementation for ephemeral
//! registries and tests, and a filesystem implementation with the reference
//! on-disk layout. Either must be safe under concurrent calls from multiple
//! tasks; writers serialize internally.

mod blob;
mod fs;
mod manifest;
mod memory;

pub use blob::BlobStore;
pub use fs::{FsBlobStore, FsManifestStore};
pub use manifest::{
    ManifestKey, ManifestStore, RegistryFilter, SearchOptions, SearchResults,
};
pub use memory::{MemoryBlobStore, MemoryManifestStore};
