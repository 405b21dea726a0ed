//! The content-addressable registry: blob store + manifest store composed
//! into put/get/has/remove/list and garbage collection.

pub mod executor;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::archive;
use crate::core::checksum::digest_file_set;
use crate::core::errors::{ResourceXError, kind_of};
use crate::core::fileset::FileSet;
use crate::core::locator::Locator;
use crate::core::manifest::{ArchiveSection, Manifest, StoredManifest};
use crate::core::resource::Resource;
use crate::store::{
    BlobStore, ManifestKey, ManifestStore, SearchOptions, SearchResults,
};

/// Content-addressable resource registry.
///
/// Owns its two stores exclusively. Within one `put`, blob writes happen
/// before the manifest write, so a crash can only leave orphan blobs
/// (recoverable by [`CasRegistry::gc`]), never a manifest referencing a
/// missing blob.
pub struct CasRegistry {
    blobs: Arc<dyn BlobStore>,
    manifests: Arc<dyn ManifestStore>,
    /// Readers are ordinary operations; the writer is the GC reachability
    /// scan, which must observe a consistent manifest snapshot.
    gc_gate: RwLock<()>,
}

impl CasRegistry {
    pub fn new(blobs: Arc<dyn BlobStore>, manifests: Arc<dyn ManifestStore>) -> Self {
        Self {
            blobs,
            manifests,
            gc_gate: RwLock::new(()),
        }
    }

    /// Read-only handle to the blob store, for diagnostics.
    pub fn blob_store(&self) -> &dyn BlobStore {
        &*self.blobs
    }

    /// Read-only handle to the manifest store, for diagnostics.
    pub fn manifest_store(&self) -> &dyn ManifestStore {
        &*self.manifests
    }

    /// Store a resource: extract its archive, deduplicate every file into
    /// the blob store, then index the manifest and move the `latest`
    /// pointer to its tag.
    ///
    /// Cancellation between the blob phase and the manifest write aborts
    /// cleanly; orphaned blobs are left for GC.
    #[tracing::instrument(level = "debug", skip_all, fields(identifier = %resource.identifier))]
    pub async fn put(&self, resource: &Resource, ct: &CancellationToken) -> Result<()> {
        let _gate = self.gc_gate.read().await;

        let files = archive::unpack(&resource.archive)?;

        let mut file_digests = std::collections::BTreeMap::new();
        for (name, bytes) in files.iter() {
            if ct.is_cancelled() {
                return Err(ResourceXError::Cancelled.into());
            }
            let digest = self.blobs.put(bytes).await?;
            trace!(%digest, file = %name, "stored blob");
            file_digests.insert(name.clone(), digest);
        }
        if ct.is_cancelled() {
            return Err(ResourceXError::Cancelled.into());
        }

        let key = ManifestKey::from_locator(&resource.identifier);
        let stored = StoredManifest::new(resource.manifest.definition.clone(), file_digests);
        self.manifests.put(&key, stored).await?;
        self.manifests
            .set_latest(key.registry.as_deref(), &key.name, &key.tag)
            .await?;

        debug!(key = %key, "stored resource");
        Ok(())
    }

    /// Fetch a resource, rebuilding its archive from blob bytes.
    ///
    /// The `latest` tag resolves through the tag pointer. When no pointer
    /// exists (a store populated by another writer), the most recently
    /// created tag is used instead; `put` always writes a pointer, so this
    /// fallback never triggers for resources stored through this registry.
    ///
    /// Every referenced blob is fetched and re-verified; a missing or
    /// tampered blob is corrupt state, not a lookup miss.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, locator: &Locator) -> Result<Resource> {
        let _gate = self.gc_gate.read().await;

        let key = match self.resolve_key(locator).await? {
            Some(key) => key,
            None => return Err(not_found(locator)),
        };
        let Some(stored) = self.manifests.get(&key).await? else {
            return Err(not_found(locator));
        };

        let mut files = FileSet::new();
        for (name, digest) in &stored.files {
            let bytes = match self.blobs.get(digest).await {
                Ok(bytes) => bytes,
                Err(err) if matches!(kind_of(&err), Some(ResourceXError::BlobNotFound { .. })) => {
                    return Err(ResourceXError::CorruptState {
                        reason: format!(
                            "manifest `{key}` references missing blob {digest} for `{name}`"
                        ),
                    }
                    .into());
                }
                Err(err) => return Err(err),
            };
            let actual = crate::core::checksum::Checksum::compute(&bytes);
            if actual != *digest {
                return Err(ResourceXError::CorruptState {
                    reason: format!(
                        "blob for `{name}` in `{key}` hashes to {actual}, manifest says {digest}"
                    ),
                }
                .into());
            }
            files.insert(name.clone(), bytes)?;
        }

        let expected_digest = digest_file_set(&stored.files);
        let archive = archive::pack(&files)?;

        let identifier = Locator::from_parts(
            key.registry.as_deref(),
            stored.definition.path.as_deref(),
            &key.name,
            &key.tag,
        );
        let mut definition = stored.definition.clone();
        definition.tag = key.tag.clone();
        definition.registry = key.registry.clone();

        let manifest = Manifest {
            definition,
            archive: ArchiveSection {
                digest: expected_digest,
                files: stored.files.clone(),
            },
            source: files.source_section(),
        };

        Ok(Resource::new(identifier, manifest, archive))
    }

    /// Tag resolution as in [`CasRegistry::get`], then a manifest existence
    /// check.
    pub async fn has(&self, locator: &Locator) -> Result<bool> {
        let _gate = self.gc_gate.read().await;
        match self.resolve_key(locator).await? {
            Some(key) => self.manifests.has(&key).await,
            None => Ok(false),
        }
    }

    /// Delete the manifest entry only; blobs stay behind for GC. Removing a
    /// missing entry is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn remove(&self, locator: &Locator) -> Result<()> {
        let _gate = self.gc_gate.read().await;
        if let Some(key) = self.resolve_key(locator).await? {
            self.manifests.delete(&key).await?;
        }
        Ok(())
    }

    pub async fn list(&self, opts: &SearchOptions) -> Result<SearchResults> {
        let _gate = self.gc_gate.read().await;
        self.manifests.search(opts).await
    }

    /// Drop cached manifests pulled from a registry: a specific one, or
    /// all of them. Locally published entries are never touched, and
    /// neither are blobs.
    pub async fn clear_cache(&self, registry: Option<&str>) -> Result<usize> {
        let _gate = self.gc_gate.read().await;
        self.manifests.delete_by_registry(registry).await
    }

    /// Delete every blob unreachable from any stored manifest. Returns the
    /// number of blobs deleted.
    ///
    /// The reachability scan holds the write gate, blocking `put` and
    /// `remove` for its duration; the deletions afterwards run without it.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn gc(&self) -> Result<usize> {
        let reachable: HashSet<_> = {
            let _gate = self.gc_gate.write().await;
            let all = self
                .manifests
                .search(&SearchOptions::default())
                .await?;
            all.entries
                .iter()
                .flat_map(|(_, manifest)| manifest.files.values().copied())
                .collect()
        };

        let mut deleted = 0;
        for digest in self.blobs.list().await? {
            if !reachable.contains(&digest) {
                self.blobs.delete(&digest).await?;
                deleted += 1;
            }
        }
        debug!(deleted, "garbage collected blobs");
        Ok(deleted)
    }

    /// Map a locator to a concrete store key, resolving `latest` through
    /// the tag pointer with the last-created-tag fallback. `None` means the
    /// name has no tags at all.
    async fn resolve_key(&self, locator: &Locator) -> Result<Option<ManifestKey>> {
        if !locator.has_default_tag() {
            return Ok(Some(ManifestKey::from_locator(locator)));
        }

        let registry = locator.registry();
        let name = locator.name();

        if let Some(tag) = self.manifests.get_latest(registry, name).await? {
            return Ok(Some(ManifestKey::new(registry, name, &tag)));
        }

        // An entry literally tagged `latest` needs no pointer.
        let literal = ManifestKey::from_locator(locator);
        if self.manifests.has(&literal).await? {
            return Ok(Some(literal));
        }

        let tags = self.manifests.list_tags(registry, name).await?;
        Ok(tags
            .last()
            .map(|tag| ManifestKey::new(registry, name, tag)))
    }
}

fn not_found(locator: &Locator) -> anyhow::Error {
    ResourceXError::ResourceNotFound {
        locator: locator.to_string(),
    }
    .into()
}
