use anyhow::{Result, ensure};

use crate::archive::Archive;
use crate::core::locator::Locator;
use crate::core::manifest::Manifest;

/// A complete resource: identifier, manifest and archive bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub identifier: Locator,
    pub manifest: Manifest,
    pub archive: Archive,
}

impl Resource {
    pub fn new(identifier: Locator, manifest: Manifest, archive: Archive) -> Self {
        Self {
            identifier,
            manifest,
            archive,
        }
    }

    /// Check completeness: the identifier must agree with the manifest
    /// definition on registry, path, name and tag, and the archive's
    /// recomputed digest must equal the digest recorded in the manifest.
    pub fn verify(&self) -> Result<()> {
        let definition = &self.manifest.definition;
        ensure!(
            self.identifier.registry() == definition.registry.as_deref()
                && self.identifier.path() == definition.path.as_deref()
                && self.identifier.name() == definition.name
                && self.identifier.tag() == definition.tag,
            "identifier `{}` does not match manifest definition `{}`",
            self.identifier,
            definition.locator(),
        );

        let recomputed = self.archive.digest()?;
        ensure!(
            recomputed == self.manifest.archive.digest,
            "archive digest mismatch for `{}`: manifest says {}, content is {recomputed}",
            self.identifier,
            self.manifest.archive.digest,
        );

        Ok(())
    }
}
