//! The detection pipeline: turning an opaque source (a folder on disk, or
//! an archive behind an HTTPS URL) into a complete, packable resource.
//!
//! Two chains of small interfaces drive it: loaders materialize a file tree
//! from the source, detectors decide what kind of resource that tree is.
//! First match wins in both chains.

mod detector;
mod loader;

pub use detector::{Detection, ResourceJsonDetector, SkillDetector, TypeDetector};
pub use loader::{FolderLoader, HttpsArchiveLoader, LoadedSource, SourceLoader};

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::archive;
use crate::core::errors::ResourceXError;
use crate::core::manifest::{ArchiveSection, Manifest};
use crate::core::resource::Resource;

/// Where resource content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A directory on the local filesystem.
    Path(Utf8PathBuf),
    /// An archive served over HTTP(S).
    Url(Url),
}

impl Source {
    /// Interpret a string as a URL when it has an HTTP scheme, a filesystem
    /// path otherwise.
    pub fn interpret(input: &str) -> Self {
        if input.starts_with("https://") || input.starts_with("http://") {
            if let Ok(url) = Url::parse(input) {
                return Source::Url(url);
            }
        }
        Source::Path(Utf8PathBuf::from(input))
    }

    /// A name hint for detectors: the directory basename for paths, the
    /// last path segment (sans archive extensions) for URLs.
    pub fn name_hint(&self) -> Option<String> {
        match self {
            Source::Path(path) => path.file_name().map(str::to_string),
            Source::Url(url) => {
                let segment = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
                let trimmed = segment
                    .strip_suffix(".tar.gz")
                    .or_else(|| segment.strip_suffix(".tgz"))
                    .unwrap_or(segment);
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => write!(f, "{path}"),
            Source::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Loader chain + detector chain, assembled once and reused.
pub struct SourcePipeline {
    loaders: Vec<Arc<dyn SourceLoader>>,
    detectors: Vec<Arc<dyn TypeDetector>>,
}

impl SourcePipeline {
    /// The built-in chains: folder and HTTPS-archive loaders; explicit
    /// `resource.json` detection first, then heuristics.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            loaders: vec![
                Arc::new(FolderLoader),
                Arc::new(HttpsArchiveLoader::new(http)),
            ],
            detectors: vec![
                Arc::new(ResourceJsonDetector),
                Arc::new(SkillDetector),
            ],
        }
    }

    /// Prepend a custom loader; it takes priority over built-ins.
    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loaders.insert(0, loader);
        self
    }

    /// Prepend a custom detector; it takes priority over built-ins.
    pub fn with_detector(mut self, detector: Arc<dyn TypeDetector>) -> Self {
        self.detectors.insert(0, detector);
        self
    }

    /// Load a source, detect its type, and produce a resource ready for
    /// storage: definition validated, excluded files dropped, archive
    /// packed, digests computed.
    #[tracing::instrument(level = "debug", skip(self, ct))]
    pub async fn resolve_source(
        &self,
        source: &Source,
        ct: &CancellationToken,
    ) -> Result<Resource> {
        let loaded = self.load(source, ct).await?;
        let detection = self.detect(source, &loaded)?;
        debug!(
            resource_type = %detection.definition.resource_type,
            name = %detection.definition.name,
            "detected resource"
        );

        let definition = detection.definition;
        definition
            .validate()
            .with_context(|| format!("detection produced an invalid definition for `{source}`"))?;

        let mut files = loaded.files;
        for excluded in &detection.exclude_from_content {
            files.remove(excluded);
        }

        let file_digests = files.digests();
        let archive = archive::pack(&files)?;
        let manifest = Manifest {
            definition: definition.clone(),
            archive: ArchiveSection::from_file_digests(file_digests),
            source: files.source_section(),
        };

        Ok(Resource::new(definition.locator(), manifest, archive))
    }

    /// Whether a previously ingested source is still up to date with
    /// respect to a cache timestamp. Unknown sources count as stale.
    pub async fn is_fresh(&self, source: &Source, cached_at: DateTime<Utc>) -> Result<bool> {
        match self.loaders.iter().find(|l| l.can_load(source)) {
            Some(loader) => loader.is_fresh(source, cached_at).await,
            None => Ok(false),
        }
    }

    async fn load(&self, source: &Source, ct: &CancellationToken) -> Result<LoadedSource> {
        let Some(loader) = self.loaders.iter().find(|l| l.can_load(source)) else {
            return Err(ResourceXError::NoLoader {
                origin: source.to_string(),
            }
            .into());
        };
        loader.load(source, ct).await
    }

    fn detect(&self, source: &Source, loaded: &LoadedSource) -> Result<Detection> {
        for detector in &self.detectors {
            if let Some(detection) = detector.detect(&loaded.files, source)? {
                return Ok(detection);
            }
        }
        Err(ResourceXError::Undetectable {
            origin: source.to_string(),
        }
        .into())
    }
}
