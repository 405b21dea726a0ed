use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;

use crate::core::checksum::Checksum;
use crate::core::errors::ResourceXError;
use crate::core::manifest::StoredManifest;
use crate::store::blob::BlobStore;
use crate::store::manifest::{
    ManifestKey, ManifestStore, SearchOptions, SearchResults,
};

/// In-memory blob store. Backs ephemeral registries and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<Checksum, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, digest: &Checksum) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().unwrap();
        blobs.get(digest).cloned().ok_or_else(|| {
            ResourceXError::BlobNotFound {
                digest: digest.to_string(),
            }
            .into()
        })
    }

    async fn put(&self, bytes: &[u8]) -> Result<Checksum> {
        let digest = Checksum::compute(bytes);
        let mut blobs = self.blobs.write().unwrap();
        blobs.entry(digest).or_insert_with(|| bytes.to_vec());
        Ok(digest)
    }

    async fn has(&self, digest: &Checksum) -> Result<bool> {
        Ok(self.blobs.read().unwrap().contains_key(digest))
    }

    async fn delete(&self, digest: &Checksum) -> Result<()> {
        self.blobs.write().unwrap().remove(digest);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checksum>> {
        let mut digests: Vec<_> = self.blobs.read().unwrap().keys().copied().collect();
        digests.sort();
        Ok(digests)
    }
}

#[derive(Debug, Default)]
struct ManifestsInner {
    /// Entry payloads plus the sequence number of their first insertion;
    /// search and tag listings follow this insertion order.
    entries: HashMap<ManifestKey, (u64, StoredManifest)>,
    latest: HashMap<(Option<String>, String), String>,
    next_seq: u64,
}

/// In-memory manifest store.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    inner: RwLock<ManifestsInner>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered_entries(
        inner: &ManifestsInner,
        mut filter: impl FnMut(&ManifestKey) -> bool,
    ) -> Vec<(ManifestKey, StoredManifest)> {
        inner
            .entries
            .iter()
            .filter(|(key, _)| filter(key))
            .sorted_by_key(|(_, (seq, _))| *seq)
            .map(|(key, (_, manifest))| (key.clone(), manifest.clone()))
            .collect()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn get(&self, key: &ManifestKey) -> Result<Option<StoredManifest>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.entries.get(key).map(|(_, manifest)| manifest.clone()))
    }

    async fn put(&self, key: &ManifestKey, mut manifest: StoredManifest) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        manifest.updated_at = Utc::now();
        match inner.entries.get(key) {
            Some((seq, existing)) => {
                manifest.created_at = existing.created_at;
                let seq = *seq;
                inner.entries.insert(key.clone(), (seq, manifest));
            }
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.entries.insert(key.clone(), (seq, manifest));
            }
        }
        Ok(())
    }

    async fn has(&self, key: &ManifestKey) -> Result<bool> {
        Ok(self.inner.read().unwrap().entries.contains_key(key))
    }

    async fn delete(&self, key: &ManifestKey) -> Result<bool> {
        Ok(self.inner.write().unwrap().entries.remove(key).is_some())
    }

    async fn list_tags(&self, registry: Option<&str>, name: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        let entries = Self::ordered_entries(&inner, |key| {
            key.registry.as_deref() == registry && key.name == name
        });
        Ok(entries.into_iter().map(|(key, _)| key.tag).collect())
    }

    async fn list_names(&self, registry: Option<&str>, query: Option<&str>) -> Result<Vec<String>> {
        let query = query.map(str::to_lowercase);
        let inner = self.inner.read().unwrap();
        let entries = Self::ordered_entries(&inner, |key| {
            key.registry.as_deref() == registry
                && query
                    .as_deref()
                    .is_none_or(|q| key.name.to_lowercase().contains(q))
        });
        let mut names = Vec::new();
        for (key, _) in entries {
            if !names.contains(&key.name) {
                names.push(key.name);
            }
        }
        Ok(names)
    }

    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults> {
        let inner = self.inner.read().unwrap();
        let matched = Self::ordered_entries(&inner, |key| opts.accepts(key));
        let total = matched.len();
        Ok(SearchResults {
            entries: opts.paginate(matched),
            total,
        })
    }

    async fn delete_by_registry(&self, registry: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| match registry {
            Some(registry) => key.registry.as_deref() != Some(registry),
            None => key.registry.is_none(),
        });
        Ok(before - inner.entries.len())
    }

    async fn set_latest(&self, registry: Option<&str>, name: &str, tag: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.latest.insert(
            (registry.map(str::to_string), name.to_string()),
            tag.to_string(),
        );
        Ok(())
    }

    async fn get_latest(&self, registry: Option<&str>, name: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .latest
            .get(&(registry.map(str::to_string), name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::core::manifest::Definition;
    use crate::store::manifest::RegistryFilter;

    use super::*;

    fn stored(name: &str) -> StoredManifest {
        StoredManifest::new(Definition::new(name, "text"), BTreeMap::new())
    }

    #[tokio::test]
    async fn blob_put_is_idempotent_and_listed() {
        let store = MemoryBlobStore::new();
        let first = store.put(b"shared").await.unwrap();
        let second = store.put(b"shared").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list().await.unwrap(), vec![first]);
        assert_eq!(store.get(&first).await.unwrap(), b"shared");

        store.delete(&first).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get(&first).await.is_err());
    }

    #[tokio::test]
    async fn put_preserves_created_at() {
        let store = MemoryManifestStore::new();
        let key = ManifestKey::new(None, "hello", "1.0.0");

        store.put(&key, stored("hello")).await.unwrap();
        let first = store.get(&key).await.unwrap().unwrap();

        store.put(&key, stored("hello")).await.unwrap();
        let second = store.get(&key).await.unwrap().unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn search_is_insertion_ordered_and_paginated() {
        let store = MemoryManifestStore::new();
        for name in ["alpha", "beta", "gamma", "albatross"] {
            let key = ManifestKey::new(None, name, "1.0.0");
            store.put(&key, stored(name)).await.unwrap();
        }

        let all = store.search(&SearchOptions::default()).await.unwrap();
        assert_eq!(all.total, 4);
        let names: Vec<_> = all.entries.iter().map(|(k, _)| k.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "gamma", "albatross"]);

        let page = store
            .search(&SearchOptions {
                offset: 1,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        let names: Vec<_> = page.entries.iter().map(|(k, _)| k.name.as_str()).collect();
        assert_eq!(names, ["beta", "gamma"]);

        let queried = store
            .search(&SearchOptions {
                query: Some("AL".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(queried.total, 2);
        let names: Vec<_> = queried.entries.iter().map(|(k, _)| k.name.as_str()).collect();
        assert_eq!(names, ["alpha", "albatross"]);
    }

    #[tokio::test]
    async fn registry_filter_tri_state() {
        let store = MemoryManifestStore::new();
        store
            .put(&ManifestKey::new(None, "local-one", "1.0.0"), stored("local-one"))
            .await
            .unwrap();
        store
            .put(
                &ManifestKey::new(Some("example.com"), "remote-one", "1.0.0"),
                stored("remote-one"),
            )
            .await
            .unwrap();

        let any = store.search(&SearchOptions::default()).await.unwrap();
        assert_eq!(any.total, 2);

        let local = store
            .search(&SearchOptions {
                registry: RegistryFilter::Local,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(local.entries[0].0.name, "local-one");
        assert_eq!(local.total, 1);

        let named = store
            .search(&SearchOptions {
                registry: RegistryFilter::Named("example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(named.entries[0].0.name, "remote-one");
        assert_eq!(named.total, 1);
    }

    #[tokio::test]
    async fn delete_by_registry_spares_local() {
        let store = MemoryManifestStore::new();
        store
            .put(&ManifestKey::new(None, "local-one", "1.0.0"), stored("local-one"))
            .await
            .unwrap();
        store
            .put(&ManifestKey::new(Some("a.com"), "x", "1.0.0"), stored("x"))
            .await
            .unwrap();
        store
            .put(&ManifestKey::new(Some("b.com"), "y", "1.0.0"), stored("y"))
            .await
            .unwrap();

        let removed = store.delete_by_registry(Some("a.com")).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.has(&ManifestKey::new(Some("b.com"), "y", "1.0.0")).await.unwrap());
        assert!(store.has(&ManifestKey::new(None, "local-one", "1.0.0")).await.unwrap());
    }

    #[tokio::test]
    async fn list_names_dedupes_tags() {
        let store = MemoryManifestStore::new();
        for tag in ["1.0.0", "2.0.0"] {
            store
                .put(&ManifestKey::new(None, "hello", tag), stored("hello"))
                .await
                .unwrap();
        }
        store
            .put(&ManifestKey::new(None, "other", "1.0.0"), stored("other"))
            .await
            .unwrap();

        assert_eq!(store.list_names(None, None).await.unwrap(), ["hello", "other"]);
        assert_eq!(store.list_names(None, Some("HELL")).await.unwrap(), ["hello"]);
        assert!(store.list_names(Some("example.com"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_pointer_roundtrip() {
        let store = MemoryManifestStore::new();
        assert_eq!(store.get_latest(None, "hello").await.unwrap(), None);

        store.set_latest(None, "hello", "1.0.0").await.unwrap();
        store.set_latest(None, "hello", "2.0.0").await.unwrap();
        assert_eq!(
            store.get_latest(None, "hello").await.unwrap().as_deref(),
            Some("2.0.0")
        );

        // Pointers are per registry namespace.
        assert_eq!(store.get_latest(Some("example.com"), "hello").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_tags_in_insertion_order() {
        let store = MemoryManifestStore::new();
        for tag in ["2.0.0", "1.0.0", "3.0.0"] {
            store
                .put(&ManifestKey::new(None, "hello", tag), stored("hello"))
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_tags(None, "hello").await.unwrap(),
            ["2.0.0", "1.0.0", "3.0.0"]
        );
    }
}
