pub mod checksum;
pub mod errors;
pub mod fileset;
pub mod locator;
pub mod manifest;
pub mod resource;

pub use checksum::{Checksum, Digest, digest_file_set};
pub use errors::ResourceXError;
pub use fileset::{FileSet, TreeEntry};
pub use locator::Locator;
pub use manifest::{ArchiveSection, Definition, Manifest, SourceEntry, SourceSection, StoredManifest};
pub use resource::Resource;
