use std::time::SystemTime;

use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::archive::{self, Archive};
use crate::core::errors::ResourceXError;
use crate::core::fileset::FileSet;
use crate::internal::fsx;
use crate::sources::Source;

/// A loaded source: where it came from and the file tree it contained.
#[derive(Debug)]
pub struct LoadedSource {
    pub source: Source,
    pub files: FileSet,
}

/// Materializes a file tree out of one kind of source.
#[async_trait]
pub trait SourceLoader: Send + Sync {
    fn can_load(&self, source: &Source) -> bool;

    async fn load(&self, source: &Source, ct: &CancellationToken) -> Result<LoadedSource>;

    /// Whether the source is unchanged since `cached_at`. Loaders that
    /// cannot tell report stale, forcing a re-ingest.
    async fn is_fresh(&self, _source: &Source, _cached_at: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }
}

/// Loads a directory tree from the local filesystem.
///
/// Dot-prefixed entries (`.git`, `.DS_Store`, ...) are skipped; everything
/// else is read whole. Paths in the resulting file set are relative with
/// `/` separators.
pub struct FolderLoader;

#[async_trait]
impl SourceLoader for FolderLoader {
    fn can_load(&self, source: &Source) -> bool {
        matches!(source, Source::Path(path) if path.is_dir())
    }

    async fn load(&self, source: &Source, _ct: &CancellationToken) -> Result<LoadedSource> {
        let Source::Path(root) = source else {
            unreachable!("checked by can_load");
        };
        let root = root.clone();
        let files = spawn_blocking(move || read_folder(&root)).await??;
        Ok(LoadedSource {
            source: source.clone(),
            files,
        })
    }

    async fn is_fresh(&self, source: &Source, cached_at: DateTime<Utc>) -> Result<bool> {
        let Source::Path(root) = source else {
            return Ok(false);
        };
        let root = root.clone();
        spawn_blocking(move || {
            let Some(latest) = latest_mtime(&root)? else {
                return Ok(false);
            };
            Ok(DateTime::<Utc>::from(latest) <= cached_at)
        })
        .await?
    }
}

fn read_folder(root: &Utf8PathBuf) -> Result<FileSet> {
    let mut files = FileSet::new();
    for entry in visible_entries(root) {
        let entry = entry.with_context(|| format!("failed to walk `{root}`"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walked path is under its root");
        let relative = relative
            .to_str()
            .with_context(|| format!("non-UTF-8 file name under `{root}`"))?
            .replace(std::path::MAIN_SEPARATOR, "/");
        files.insert(relative, fsx::read(entry.path())?)?;
    }
    Ok(files)
}

fn latest_mtime(root: &Utf8PathBuf) -> Result<Option<SystemTime>> {
    let mut latest = None;
    for entry in visible_entries(root) {
        let entry = entry.with_context(|| format!("failed to walk `{root}`"))?;
        let modified = entry
            .metadata()
            .with_context(|| format!("failed to stat `{}`", entry.path().display()))?
            .modified()?;
        if latest.is_none_or(|seen| modified > seen) {
            latest = Some(modified);
        }
    }
    Ok(latest)
}

fn visible_entries(root: &Utf8PathBuf) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with('.'))
        })
}

/// Downloads a gzipped tar from an HTTP(S) URL and unpacks it.
pub struct HttpsArchiveLoader {
    http: reqwest::Client,
}

impl HttpsArchiveLoader {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceLoader for HttpsArchiveLoader {
    fn can_load(&self, source: &Source) -> bool {
        matches!(source, Source::Url(url) if matches!(url.scheme(), "http" | "https"))
    }

    async fn load(&self, source: &Source, ct: &CancellationToken) -> Result<LoadedSource> {
        let Source::Url(url) = source else {
            unreachable!("checked by can_load");
        };

        let response = tokio::select! {
            _ = ct.cancelled() => return Err(ResourceXError::Cancelled.into()),
            response = self.http.get(url.clone()).send() => {
                response.map_err(transport)?
            }
        };
        if !response.status().is_success() {
            return Err(ResourceXError::Transport {
                reason: format!("GET {url} returned {}", response.status()),
            }
            .into());
        }

        let bytes = tokio::select! {
            _ = ct.cancelled() => return Err(ResourceXError::Cancelled.into()),
            bytes = response.bytes() => bytes.map_err(transport)?,
        };

        let files = archive::unpack(&Archive::from_bytes(bytes.to_vec()))
            .with_context(|| format!("source at {url} is not a gzipped tar"))?;
        Ok(LoadedSource {
            source: source.clone(),
            files,
        })
    }
}

fn transport(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        ResourceXError::Timeout {
            reason: err.to_string(),
        }
        .into()
    } else {
        ResourceXError::Transport {
            reason: err.to_string(),
        }
        .into()
    }
}
