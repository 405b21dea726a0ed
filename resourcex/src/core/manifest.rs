use std::collections::BTreeMap;

use anyhow::{Result, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_TAG;
use crate::core::checksum::{Checksum, digest_file_set};
use crate::core::locator::Locator;

/// User-authored resource metadata. Created by detection or written by hand
/// in `resource.json`; immutable once wrapped into a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    /// Opaque resource kind (`text`, `json`, `skill`, `prompt`, ...). The
    /// store never interprets it; the executor registry dispatches on it.
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

impl Definition {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            tag: default_tag(),
            description: None,
            author: None,
            license: None,
            keywords: Vec::new(),
            repository: None,
            registry: None,
            path: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "resource definition is missing `name`");
        ensure!(
            !self.resource_type.is_empty(),
            "resource definition is missing `type`"
        );
        ensure!(!self.tag.is_empty(), "resource definition has an empty `tag`");
        Ok(())
    }

    /// The locator this definition describes.
    pub fn locator(&self) -> Locator {
        Locator::from_parts(
            self.registry.as_deref(),
            self.path.as_deref(),
            &self.name,
            &self.tag,
        )
    }
}

/// Packaging metadata of a resource: the archive digest plus per-file
/// digests. Reserved room for future signatures lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSection {
    pub digest: Checksum,
    pub files: BTreeMap<String, Checksum>,
}

impl ArchiveSection {
    /// Build the section from per-file digests; the archive digest is
    /// derived from them.
    pub fn from_file_digests(files: BTreeMap<String, Checksum>) -> Self {
        let digest = digest_file_set(&files);
        Self { digest, files }
    }
}

/// One file's entry in the manifest source section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Human-oriented view of the resource file tree: sizes and previews.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default)]
    pub files: BTreeMap<String, SourceEntry>,
}

impl SourceSection {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The stored metadata of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub definition: Definition,
    pub archive: ArchiveSection,
    #[serde(default, skip_serializing_if = "SourceSection::is_empty")]
    pub source: SourceSection,
}

/// The manifest form kept inside the manifest store: definition fields plus
/// the file digest map and timestamps. Blob bytes are never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredManifest {
    #[serde(flatten)]
    pub definition: Definition,
    pub files: BTreeMap<String, Checksum>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredManifest {
    pub fn new(definition: Definition, files: BTreeMap<String, Checksum>) -> Self {
        let now = Utc::now();
        Self {
            definition,
            files,
            created_at: now,
            updated_at: now,
        }
    }

    /// The archive digest implied by the stored file digests.
    pub fn archive_digest(&self) -> Checksum {
        digest_file_set(&self.files)
    }
}
