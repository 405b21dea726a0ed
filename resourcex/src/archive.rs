//! The archive codec: a resource file tree packed as gzipped POSIX tar.
//!
//! Packing is reproducible: entries are written in lexicographic path order
//! with mode `0644` and zero mtimes, directories are omitted, and the gzip
//! stream carries no timestamp. Identical file sets therefore produce
//! identical archive bytes.

use std::fmt;
use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::core::checksum::{Checksum, digest_file_set};
use crate::core::errors::ResourceXError;
use crate::core::fileset::FileSet;

const GZIP_LEVEL: u32 = 6;

/// Opaque archive bytes. Addressed only by digest; the bytes are immutable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Archive {
    bytes: Vec<u8>,
}

impl Archive {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The canonical digest of this archive: the file-set digest of its
    /// unpacked contents. Independent of compression details by
    /// construction.
    pub fn digest(&self) -> Result<Checksum> {
        let files = unpack(self)?;
        Ok(digest_file_set(&files.digests()))
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Archive({} bytes)", self.bytes.len())
    }
}

/// Pack a file tree into gzipped tar.
pub fn pack(files: &FileSet) -> Result<Archive> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, bytes) in files.iter() {
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_size(bytes.len() as u64);
        builder
            .append_data(&mut header, path, bytes.as_slice())
            .with_context(|| format!("failed to archive `{path}`"))?;
    }
    let tar_bytes = builder
        .into_inner()
        .context("failed to finish tar stream")?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL));
    encoder
        .write_all(&tar_bytes)
        .and_then(|_| encoder.finish())
        .map(Archive::from_bytes)
        .context("failed to compress archive")
}

/// Unpack gzipped tar into a file tree.
///
/// Only regular file entries are retained; directories and links are
/// dropped. Truncated or mangled input fails with a `CorruptArchive` kind.
pub fn unpack(archive: &Archive) -> Result<FileSet> {
    let decoder = GzDecoder::new(archive.as_bytes());
    let mut tar = tar::Archive::new(decoder);

    let mut files = FileSet::new();
    for entry in tar.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(corrupt)?
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| corrupt("non-UTF-8 entry path"))?;

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).map_err(corrupt)?;

        files
            .insert(path, bytes)
            .map_err(|err| corrupt(format!("unsafe entry path: {err}")))?;
    }
    Ok(files)
}

fn corrupt(reason: impl fmt::Display) -> anyhow::Error {
    ResourceXError::CorruptArchive {
        reason: reason.to_string(),
    }
    .into()
}
