use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tokio::task::spawn_blocking;

use crate::core::checksum::Checksum;
use crate::core::errors::ResourceXError;
use crate::core::manifest::StoredManifest;
use crate::store::blob::BlobStore;
use crate::store::manifest::{ManifestKey, ManifestStore, SearchOptions, SearchResults};
use crate::{LATEST_POINTER_FILE_NAME, LOCAL_NAMESPACE_DIR};

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

fn storage_io(err: impl std::fmt::Display) -> anyhow::Error {
    ResourceXError::StorageIo {
        reason: err.to_string(),
    }
    .into()
}

/// Filesystem blob store: one file per digest, named by the hex portion of
/// the digest, flat under the store root.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: Utf8PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob store at `{root}`"))?;
        Ok(Self { root })
    }

    fn blob_path(&self, digest: &Checksum) -> Utf8PathBuf {
        self.root.join(digest.hex())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, digest: &Checksum) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        let digest = *digest;
        spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ResourceXError::BlobNotFound {
                    digest: digest.to_string(),
                }
                .into())
            }
            Err(err) => Err(storage_io(err)),
        })
        .await?
    }

    async fn put(&self, bytes: &[u8]) -> Result<Checksum> {
        let digest = Checksum::compute(bytes);
        let path = self.blob_path(&digest);
        if path.exists() {
            return Ok(digest);
        }

        let bytes = bytes.to_vec();
        spawn_blocking(move || {
            // Write to a scratch file first so readers never observe a
            // partially written blob.
            let scratch = path.with_extension(format!(
                "tmp.{}",
                SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::write(&scratch, &bytes).map_err(storage_io)?;
            std::fs::rename(&scratch, &path).map_err(storage_io)?;
            Ok(digest)
        })
        .await?
    }

    async fn has(&self, digest: &Checksum) -> Result<bool> {
        Ok(self.blob_path(digest).exists())
    }

    async fn delete(&self, digest: &Checksum) -> Result<()> {
        let path = self.blob_path(digest);
        spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_io(err)),
        })
        .await?
    }

    async fn list(&self) -> Result<Vec<Checksum>> {
        let root = self.root.clone();
        spawn_blocking(move || {
            let mut digests = Vec::new();
            for entry in std::fs::read_dir(&root).map_err(storage_io)? {
                let entry = entry.map_err(storage_io)?;
                if !entry.file_type().map_err(storage_io)?.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                // Scratch files and other strays are not blobs.
                if let Ok(digest) = Checksum::from_hex(name) {
                    digests.push(digest);
                }
            }
            digests.sort();
            Ok(digests)
        })
        .await?
    }
}

/// Filesystem manifest store.
///
/// Layout under the root:
///
/// ```text
/// {registry|_local}/{name}/{tag}.json   # StoredManifest as JSON
/// {registry|_local}/{name}/_latest      # tag pointer, plain string
/// ```
///
/// Insertion order is approximated by `created_at`: directory scans cannot
/// observe true insertion order, so listings sort by creation time, then
/// key.
#[derive(Debug, Clone)]
pub struct FsManifestStore {
    root: Utf8PathBuf,
}

impl FsManifestStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create manifest store at `{root}`"))?;
        Ok(Self { root })
    }

    fn namespace_dir(&self, registry: Option<&str>) -> Utf8PathBuf {
        self.root.join(registry.unwrap_or(LOCAL_NAMESPACE_DIR))
    }

    fn name_dir(&self, registry: Option<&str>, name: &str) -> Utf8PathBuf {
        self.namespace_dir(registry).join(name)
    }

    fn manifest_path(&self, key: &ManifestKey) -> Utf8PathBuf {
        self.name_dir(key.registry.as_deref(), &key.name)
            .join(format!("{}.json", key.tag))
    }

    fn read_manifest(path: &Utf8Path) -> Result<Option<StoredManifest>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_io(err)),
        };
        let manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to deserialize manifest at `{path}`"))?;
        Ok(Some(manifest))
    }

    /// Scan every stored manifest, sorted by creation time then key.
    fn scan(root: &Utf8Path) -> Result<Vec<(ManifestKey, StoredManifest)>> {
        let mut entries = Vec::new();
        for namespace in list_dirs(root)? {
            let registry = match namespace.as_str() {
                LOCAL_NAMESPACE_DIR => None,
                other => Some(other.to_string()),
            };
            let namespace_dir = root.join(&namespace);
            for name in list_dirs(&namespace_dir)? {
                let name_dir = namespace_dir.join(&name);
                for file in list_files(&name_dir)? {
                    let Some(tag) = file.strip_suffix(".json") else {
                        continue;
                    };
                    let key = ManifestKey::new(registry.as_deref(), &name, tag);
                    if let Some(manifest) = Self::read_manifest(&name_dir.join(&file))? {
                        entries.push((key, manifest));
                    }
                }
            }
        }
        entries.sort_by(|(ka, ma), (kb, mb)| {
            (ma.created_at, ka).cmp(&(mb.created_at, kb))
        });
        Ok(entries)
    }
}

fn list_dirs(path: &Utf8Path) -> Result<Vec<String>> {
    list_entries(path, |file_type| file_type.is_dir())
}

fn list_files(path: &Utf8Path) -> Result<Vec<String>> {
    list_entries(path, |file_type| file_type.is_file())
}

fn list_entries(path: &Utf8Path, keep: impl Fn(&std::fs::FileType) -> bool) -> Result<Vec<String>> {
    let read_dir = match std::fs::read_dir(path) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(storage_io(err)),
    };
    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(storage_io)?;
        if !keep(&entry.file_type().map_err(storage_io)?) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl ManifestStore for FsManifestStore {
    async fn get(&self, key: &ManifestKey) -> Result<Option<StoredManifest>> {
        let path = self.manifest_path(key);
        spawn_blocking(move || Self::read_manifest(&path)).await?
    }

    async fn put(&self, key: &ManifestKey, mut manifest: StoredManifest) -> Result<()> {
        let path = self.manifest_path(key);
        spawn_blocking(move || {
            manifest.updated_at = Utc::now();
            if let Some(existing) = Self::read_manifest(&path)? {
                manifest.created_at = existing.created_at;
            }
            std::fs::create_dir_all(path.parent().expect("manifest path has a parent"))
                .map_err(storage_io)?;
            let json = serde_json::to_vec_pretty(&manifest)?;
            std::fs::write(&path, json).map_err(storage_io)?;
            Ok(())
        })
        .await?
    }

    async fn has(&self, key: &ManifestKey) -> Result<bool> {
        Ok(self.manifest_path(key).exists())
    }

    async fn delete(&self, key: &ManifestKey) -> Result<bool> {
        let path = self.manifest_path(key);
        spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_io(err)),
        })
        .await?
    }

    async fn list_tags(&self, registry: Option<&str>, name: &str) -> Result<Vec<String>> {
        let dir = self.name_dir(registry, name);
        spawn_blocking(move || {
            let mut tagged = Vec::new();
            for file in list_files(&dir)? {
                let Some(tag) = file.strip_suffix(".json") else {
                    continue;
                };
                if let Some(manifest) = Self::read_manifest(&dir.join(&file))? {
                    tagged.push((manifest.created_at, tag.to_string()));
                }
            }
            tagged.sort();
            Ok(tagged.into_iter().map(|(_, tag)| tag).collect())
        })
        .await?
    }

    async fn list_names(&self, registry: Option<&str>, query: Option<&str>) -> Result<Vec<String>> {
        let dir = self.namespace_dir(registry);
        let query = query.map(str::to_lowercase);
        spawn_blocking(move || {
            Ok(list_dirs(&dir)?
                .into_iter()
                .filter(|name| {
                    query
                        .as_deref()
                        .is_none_or(|q| name.to_lowercase().contains(q))
                })
                .collect())
        })
        .await?
    }

    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults> {
        let root = self.root.clone();
        let opts = opts.clone();
        spawn_blocking(move || {
            let matched: Vec<_> = Self::scan(&root)?
                .into_iter()
                .filter(|(key, _)| opts.accepts(key))
                .collect();
            let total = matched.len();
            Ok(SearchResults {
                entries: opts.paginate(matched),
                total,
            })
        })
        .await?
    }

    async fn delete_by_registry(&self, registry: Option<&str>) -> Result<usize> {
        let root = self.root.clone();
        let registry = registry.map(str::to_string);
        spawn_blocking(move || {
            let victims: Vec<String> = match &registry {
                Some(registry) => vec![registry.clone()],
                None => list_dirs(&root)?
                    .into_iter()
                    .filter(|dir| dir != LOCAL_NAMESPACE_DIR)
                    .collect(),
            };

            let mut removed = 0;
            for victim in victims {
                let dir = root.join(&victim);
                for name in list_dirs(&dir)? {
                    removed += list_files(&dir.join(&name))?
                        .iter()
                        .filter(|file| file.ends_with(".json"))
                        .count();
                }
                match std::fs::remove_dir_all(&dir) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(storage_io(err)),
                }
            }
            Ok(removed)
        })
        .await?
    }

    async fn set_latest(&self, registry: Option<&str>, name: &str, tag: &str) -> Result<()> {
        let dir = self.name_dir(registry, name);
        let tag = tag.to_string();
        spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(storage_io)?;
            std::fs::write(dir.join(LATEST_POINTER_FILE_NAME), tag).map_err(storage_io)?;
            Ok(())
        })
        .await?
    }

    async fn get_latest(&self, registry: Option<&str>, name: &str) -> Result<Option<String>> {
        let path = self.name_dir(registry, name).join(LATEST_POINTER_FILE_NAME);
        spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(tag) => Ok(Some(tag.trim().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_io(err)),
        })
        .await?
    }
}
