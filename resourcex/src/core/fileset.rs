use std::collections::BTreeMap;

use anyhow::{Result, bail, ensure};
use serde::Serialize;

use crate::core::checksum::Checksum;
use crate::core::manifest::{SourceEntry, SourceSection};

/// Number of leading characters of a UTF-8 file kept as its preview in the
/// manifest source section.
const PREVIEW_CHARS: usize = 256;

/// The materialized file tree of a resource: an ordered mapping from POSIX
/// path to file bytes.
///
/// Paths use `/` separators, are relative (no leading `/`), and must not
/// contain `.` or `..` segments. Ordering is lexicographic by path, which
/// makes downstream packaging and digests reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<String, Vec<u8>>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, validating its path.
    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        let path = path.into();
        validate_path(&path)?;
        self.files.insert(path, bytes);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<u8>)> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    /// Per-file content digests, keyed by path.
    pub fn digests(&self) -> BTreeMap<String, Checksum> {
        self.files
            .iter()
            .map(|(path, bytes)| (path.clone(), Checksum::compute(bytes)))
            .collect()
    }

    /// The manifest source section for this tree: per-file sizes plus a
    /// short preview of textual content.
    pub fn source_section(&self) -> SourceSection {
        let files = self
            .files
            .iter()
            .map(|(path, bytes)| {
                (
                    path.clone(),
                    SourceEntry {
                        size: bytes.len() as u64,
                        preview: preview(bytes),
                    },
                )
            })
            .collect();
        SourceSection { files }
    }

    /// Derived directory view: nested directories with the files they hold.
    pub fn tree(&self) -> Vec<TreeEntry> {
        let mut root = Vec::new();
        for (path, bytes) in &self.files {
            let segments: Vec<&str> = path.split('/').collect();
            insert_into_tree(&mut root, &segments, bytes.len() as u64);
        }
        root
    }
}

impl FromIterator<(String, Vec<u8>)> for FileSet {
    /// Panics on invalid paths; use [`FileSet::insert`] for untrusted input.
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        let mut files = FileSet::new();
        for (path, bytes) in iter {
            files.insert(path, bytes).unwrap();
        }
        files
    }
}

/// One node of the derived directory view.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeEntry {
    Dir {
        name: String,
        children: Vec<TreeEntry>,
    },
    File {
        name: String,
        size: u64,
    },
}

impl TreeEntry {
    pub fn name(&self) -> &str {
        match self {
            TreeEntry::Dir { name, .. } => name,
            TreeEntry::File { name, .. } => name,
        }
    }
}

fn insert_into_tree(level: &mut Vec<TreeEntry>, segments: &[&str], size: u64) {
    let [segment, rest @ ..] = segments else {
        return;
    };

    if rest.is_empty() {
        level.push(TreeEntry::File {
            name: segment.to_string(),
            size,
        });
        return;
    }

    let dir = level.iter_mut().find_map(|entry| match entry {
        TreeEntry::Dir { name, children } if name == segment => Some(children),
        _ => None,
    });
    match dir {
        Some(children) => insert_into_tree(children, rest, size),
        None => {
            let mut children = Vec::new();
            insert_into_tree(&mut children, rest, size);
            level.push(TreeEntry::Dir {
                name: segment.to_string(),
                children,
            });
        }
    }
}

fn validate_path(path: &str) -> Result<()> {
    ensure!(!path.is_empty(), "file path cannot be empty");
    if path.starts_with('/') {
        bail!("file path cannot be absolute: `{path}`");
    }
    if path.contains('\\') {
        bail!("file path must use `/` separators: `{path}`");
    }
    for segment in path.split('/') {
        match segment {
            "" => bail!("file path contains an empty segment: `{path}`"),
            "." | ".." => bail!("file path contains a relative segment: `{path}`"),
            _ => {}
        }
    }
    Ok(())
}

fn preview(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    Some(text.chars().take(PREVIEW_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileSet {
        [
            ("SKILL.md".to_string(), b"# Greeting\n".to_vec()),
            ("lib/helper.txt".to_string(), b"helper".to_vec()),
            ("lib/deep/a.bin".to_string(), vec![0u8, 159, 146, 150]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn iteration_is_path_sorted() {
        let files = sample();
        let paths: Vec<_> = files.paths().cloned().collect();
        assert_eq!(paths, ["SKILL.md", "lib/deep/a.bin", "lib/helper.txt"]);
    }

    #[test]
    fn rejects_unsafe_paths() {
        let mut files = FileSet::new();
        assert!(files.insert("/etc/passwd", vec![]).is_err());
        assert!(files.insert("../escape", vec![]).is_err());
        assert!(files.insert("a/./b", vec![]).is_err());
        assert!(files.insert("a//b", vec![]).is_err());
        assert!(files.insert("", vec![]).is_err());
        assert!(files.insert("a\\b", vec![]).is_err());
        assert!(files.insert("ok/name.txt", vec![]).is_ok());
    }

    #[test]
    fn digests_follow_content() {
        let files = sample();
        let digests = files.digests();
        assert_eq!(digests.len(), 3);
        assert_eq!(digests["lib/helper.txt"], Checksum::compute(b"helper"));
    }

    #[test]
    fn source_section_has_sizes_and_text_previews() {
        let section = sample().source_section();
        assert_eq!(section.files["SKILL.md"].size, 11);
        assert_eq!(section.files["SKILL.md"].preview.as_deref(), Some("# Greeting\n"));
        // Not valid UTF-8, so no preview.
        assert_eq!(section.files["lib/deep/a.bin"].preview, None);
    }

    #[test]
    fn tree_groups_directories() {
        let tree = sample().tree();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name(), "SKILL.md");
        let TreeEntry::Dir { name, children } = &tree[1] else {
            panic!("expected lib/ dir");
        };
        assert_eq!(name, "lib");
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name(), "deep");
        assert_eq!(children[1].name(), "helper.txt");
    }
}
