use anyhow::{Context, Result};

use crate::core::fileset::FileSet;
use crate::core::manifest::Definition;
use crate::sources::Source;
use crate::{RESOURCE_METADATA_FILE_NAME, SKILL_FILE_NAME};

/// What a detector concluded about a file tree.
#[derive(Debug, Clone)]
pub struct Detection {
    pub definition: Definition,
    /// Files that belong to the authoring workflow, not to the resource
    /// content (the metadata file itself, typically).
    pub exclude_from_content: Vec<String>,
}

/// Decides what kind of resource a file tree is. Detectors run in order;
/// the first non-`None` answer wins.
pub trait TypeDetector: Send + Sync {
    fn detect(&self, files: &FileSet, hint: &Source) -> Result<Option<Detection>>;
}

/// Explicit metadata: a `resource.json` file carrying the full definition.
/// Highest priority, and the file itself is excluded from the packed
/// content.
pub struct ResourceJsonDetector;

impl TypeDetector for ResourceJsonDetector {
    fn detect(&self, files: &FileSet, _hint: &Source) -> Result<Option<Detection>> {
        let Some(bytes) = files.get(RESOURCE_METADATA_FILE_NAME) else {
            return Ok(None);
        };
        let definition: Definition = serde_json::from_slice(bytes)
            .with_context(|| format!("malformed {RESOURCE_METADATA_FILE_NAME}"))?;
        Ok(Some(Detection {
            definition,
            exclude_from_content: vec![RESOURCE_METADATA_FILE_NAME.to_string()],
        }))
    }
}

/// Heuristic: a `SKILL.md` marker makes the tree a `skill`. The name comes
/// from the source directory basename, the description from the first
/// Markdown heading.
pub struct SkillDetector;

impl TypeDetector for SkillDetector {
    fn detect(&self, files: &FileSet, hint: &Source) -> Result<Option<Detection>> {
        let Some(marker) = files.get(SKILL_FILE_NAME) else {
            return Ok(None);
        };
        let Some(name) = hint.name_hint() else {
            return Ok(None);
        };

        let mut definition = Definition::new(name, "skill");
        definition.description = first_markdown_heading(marker);
        Ok(Some(Detection {
            definition,
            exclude_from_content: Vec::new(),
        }))
    }
}

fn first_markdown_heading(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    text.lines().find_map(|line| {
        let line = line.trim_start();
        let heading = line.strip_prefix('#')?.trim_start_matches('#').trim();
        (!heading.is_empty()).then(|| heading.to_string())
    })
}
