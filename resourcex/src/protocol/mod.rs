//! The wire protocol: HTTP endpoints served by a registry and the client
//! calls that speak to them.

pub mod client;
pub mod error;
pub mod server;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::checksum::Checksum;
use crate::core::manifest::Definition;

/// The manifest document exchanged on publish: the definition plus the
/// per-file digest map. Servers rebuild packaging metadata from the
/// uploaded content itself; additional sections sent by clients are
/// reserved and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireManifest {
    pub definition: Definition,
    #[serde(default)]
    pub files: BTreeMap<String, Checksum>,
}

/// One row of a search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRow {
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub tag: String,
}

/// Body of `GET /search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchRow>,
    pub total: usize,
}

/// Body of a successful `POST /publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub locator: String,
}
