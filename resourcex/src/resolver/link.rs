use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::locator::Locator;
use crate::internal::fsx;
use crate::sources::{Source, SourcePipeline};

/// The dev redirect table: locators mapped to working directories.
///
/// A linked locator shadows any stored resource: resolution re-reads the
/// directory on every hit, so edits show up without re-publishing. Removing
/// the link exposes the stored entry again.
pub struct LinkIndex {
    entries: RwLock<BTreeMap<LinkKey, Utf8PathBuf>>,
    /// When set, the table persists to this JSON file on every mutation.
    file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct LinkKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registry: Option<String>,
    name: String,
    tag: String,
}

impl LinkKey {
    fn of(locator: &Locator) -> Self {
        Self {
            registry: locator.registry().map(str::to_string),
            name: locator.name().to_string(),
            tag: locator.tag().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct LinkFile {
    links: Vec<(LinkKey, Utf8PathBuf)>,
}

impl LinkIndex {
    /// A table that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            file: None,
        }
    }

    /// A table persisted to `path`, loaded from it when it exists.
    pub fn with_file(path: impl Into<Utf8PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = BTreeMap::new();
        if path.exists() {
            let json = fsx::read_to_string(&path)?;
            let file: LinkFile = serde_json::from_str(&json)
                .with_context(|| format!("malformed link index at `{path}`"))?;
            entries.extend(file.links);
        }
        Ok(Self {
            entries: RwLock::new(entries),
            file: Some(path),
        })
    }

    /// Link a working directory: ingest it to derive its locator, then
    /// record the redirect. Returns the derived locator.
    pub async fn link(
        &self,
        pipeline: &SourcePipeline,
        path: &Utf8Path,
        ct: &CancellationToken,
    ) -> Result<Locator> {
        let canonical = fsx::canonicalize_utf8(path)?;
        let resource = pipeline
            .resolve_source(&Source::Path(canonical.clone()), ct)
            .await
            .with_context(|| format!("cannot link `{path}`"))?;
        let locator = resource.identifier;

        {
            let mut entries = self.entries.write().unwrap();
            entries.insert(LinkKey::of(&locator), canonical.clone());
        }
        self.save()?;

        debug!(%locator, path = %canonical, "linked resource");
        Ok(locator)
    }

    /// Remove a redirect. Returns whether one existed.
    pub fn unlink(&self, locator: &Locator) -> Result<bool> {
        let existed = {
            let mut entries = self.entries.write().unwrap();
            entries.remove(&LinkKey::of(locator)).is_some()
        };
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    pub fn list(&self) -> Vec<(Locator, Utf8PathBuf)> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .map(|(key, path)| {
                (
                    Locator::from_parts(key.registry.as_deref(), None, &key.name, &key.tag),
                    path.clone(),
                )
            })
            .collect()
    }

    /// The redirect for a locator, if any. A `latest` request matches a
    /// link under any tag for the same name: dev trees are always the
    /// latest version of themselves.
    pub fn lookup(&self, locator: &Locator) -> Option<Utf8PathBuf> {
        let entries = self.entries.read().unwrap();
        if let Some(path) = entries.get(&LinkKey::of(locator)) {
            return Some(path.clone());
        }
        if locator.has_default_tag() {
            return entries
                .iter()
                .find(|(key, _)| {
                    key.registry.as_deref() == locator.registry() && key.name == locator.name()
                })
                .map(|(_, path)| path.clone());
        }
        None
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let links: Vec<_> = {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .map(|(key, path)| (key.clone(), path.clone()))
                .collect()
        };
        let json = serde_json::to_string_pretty(&LinkFile { links })?;
        if let Some(parent) = path.parent() {
            fsx::create_dir_all(parent)?;
        }
        fsx::write(path, json)
    }
}
