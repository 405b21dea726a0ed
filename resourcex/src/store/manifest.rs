use anyhow::Result;
use async_trait::async_trait;

use crate::core::locator::Locator;
use crate::core::manifest::StoredManifest;

/// The lookup key of the manifest store: `(registry?, name, tag)`.
///
/// The locator path is metadata carried inside the stored definition; it
/// does not participate in store addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestKey {
    pub registry: Option<String>,
    pub name: String,
    pub tag: String,
}

impl ManifestKey {
    pub fn new(registry: Option<&str>, name: &str, tag: &str) -> Self {
        Self {
            registry: registry.map(str::to_string),
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }

    pub fn from_locator(locator: &Locator) -> Self {
        Self::new(locator.registry(), locator.name(), locator.tag())
    }
}

impl std::fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Registry dimension of a search: anything, local-only entries (no
/// registry), or one specific registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegistryFilter {
    #[default]
    Any,
    Local,
    Named(String),
}

impl RegistryFilter {
    fn matches(&self, registry: Option<&str>) -> bool {
        match self {
            RegistryFilter::Any => true,
            RegistryFilter::Local => registry.is_none(),
            RegistryFilter::Named(name) => registry == Some(name.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub registry: RegistryFilter,
    /// Case-insensitive substring match against the resource name.
    pub query: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SearchOptions {
    /// Does this entry pass the non-pagination filters?
    pub(crate) fn accepts(&self, key: &ManifestKey) -> bool {
        if !self.registry.matches(key.registry.as_deref()) {
            return false;
        }
        match &self.query {
            None => true,
            Some(query) => key.name.to_lowercase().contains(&query.to_lowercase()),
        }
    }

    /// Apply `offset` then `limit` to an already filtered, ordered list.
    pub(crate) fn paginate<T>(&self, entries: Vec<T>) -> Vec<T> {
        let iter = entries.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// A page of search results, plus the total number of matches before
/// pagination was applied.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub entries: Vec<(ManifestKey, StoredManifest)>,
    pub total: usize,
}

/// Store for resource manifests and per-name tag pointers.
///
/// `put` stamps `updated_at` with the current time and preserves the
/// original `created_at` when overwriting an existing entry. Search results
/// come back in insertion order.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn get(&self, key: &ManifestKey) -> Result<Option<StoredManifest>>;

    async fn put(&self, key: &ManifestKey, manifest: StoredManifest) -> Result<()>;

    async fn has(&self, key: &ManifestKey) -> Result<bool>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, key: &ManifestKey) -> Result<bool>;

    /// Tags stored for a name, oldest first.
    async fn list_tags(&self, registry: Option<&str>, name: &str) -> Result<Vec<String>>;

    /// Distinct names in a namespace, optionally filtered by a
    /// case-insensitive substring query.
    async fn list_names(&self, registry: Option<&str>, query: Option<&str>) -> Result<Vec<String>>;

    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults>;

    /// Drop manifests by registry: a specific one, or, when `None`, every
    /// entry that has any registry at all. Local entries are never touched.
    /// Returns the number of entries removed.
    async fn delete_by_registry(&self, registry: Option<&str>) -> Result<usize>;

    /// Point `latest` for a name at a concrete tag.
    async fn set_latest(&self, registry: Option<&str>, name: &str, tag: &str) -> Result<()>;

    async fn get_latest(&self, registry: Option<&str>, name: &str) -> Result<Option<String>>;
}
