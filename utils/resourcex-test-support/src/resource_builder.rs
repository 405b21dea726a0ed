use std::collections::BTreeMap;
use std::path::Path;

use resourcex::archive;
use resourcex::core::{ArchiveSection, Definition, FileSet, Manifest, Resource};
use serde_json::json;

/// Fluent builder of in-memory resources for tests.
///
/// `build` produces a complete, verified [`Resource`]; `write_to` lays the
/// files plus a `resource.json` out on disk for source-pipeline tests.
pub struct ResourceBuilder {
    name: String,
    resource_type: String,
    tag: String,
    description: Option<String>,
    registry: Option<String>,
    path: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl ResourceBuilder {
    pub fn start() -> Self {
        Self {
            name: "hello".to_string(),
            resource_type: "text".to_string(),
            tag: "1.0.0".to_string(),
            description: None,
            registry: None,
            path: None,
            files: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn file(mut self, path: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        self.files.insert(path.into(), bytes.as_ref().to_vec());
        self
    }

    fn definition(&self) -> Definition {
        let mut definition = Definition::new(&self.name, &self.resource_type);
        definition.tag = self.tag.clone();
        definition.description = self.description.clone();
        definition.registry = self.registry.clone();
        definition.path = self.path.clone();
        definition
    }

    pub fn build(self) -> Resource {
        let files: FileSet = self.files.clone().into_iter().collect();
        let definition = self.definition();

        let manifest = Manifest {
            definition: definition.clone(),
            archive: ArchiveSection::from_file_digests(files.digests()),
            source: files.source_section(),
        };
        let archive = archive::pack(&files).expect("test file set packs cleanly");

        let resource = Resource::new(definition.locator(), manifest, archive);
        resource.verify().expect("built resource is consistent");
        resource
    }

    /// Write the file tree plus an explicit `resource.json` under `dir`.
    pub fn write_to(&self, dir: &Path) {
        let mut metadata = json!({
            "name": self.name,
            "type": self.resource_type,
            "tag": self.tag,
        });
        if let Some(description) = &self.description {
            metadata["description"] = json!(description);
        }

        std::fs::create_dir_all(dir).expect("fixture dir is writable");
        std::fs::write(
            dir.join("resource.json"),
            serde_json::to_vec_pretty(&metadata).unwrap(),
        )
        .unwrap();

        for (path, bytes) in &self.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(target, bytes).unwrap();
        }
    }
}
