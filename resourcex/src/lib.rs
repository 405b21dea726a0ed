//! ResourceX is a content-addressable registry for AI artifacts: prompts,
//! tools, skills and configuration trees, addressed with Docker-style
//! locators and exchanged over a small HTTP protocol.

#![deny(clippy::dbg_macro)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod core;
mod internal;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod sources;
pub mod store;

/// Tag assumed when a locator does not spell one out.
pub const DEFAULT_TAG: &str = "latest";
/// Prefix under which all wire endpoints are mounted.
pub const API_PREFIX: &str = "/api/v1";
/// Well-known path queried during registry discovery.
pub const WELL_KNOWN_PATH: &str = "/.well-known/resourcex";
/// File name of the explicit, user-authored resource metadata.
pub const RESOURCE_METADATA_FILE_NAME: &str = "resource.json";
/// Marker file recognized by the skill detector.
pub const SKILL_FILE_NAME: &str = "SKILL.md";
/// Namespace directory used on disk for manifests stored without a registry.
pub const LOCAL_NAMESPACE_DIR: &str = "_local";
/// File name of the per-name tag pointer on disk.
pub const LATEST_POINTER_FILE_NAME: &str = "_latest";
