use std::sync::Arc;

use resourcex::archive;
use resourcex::core::errors::{ResourceXError, kind_of};
use resourcex::core::{Checksum, Locator, StoredManifest};
use resourcex::registry::CasRegistry;
use resourcex::store::{
    ManifestKey, MemoryBlobStore, MemoryManifestStore, RegistryFilter, SearchOptions,
};
use resourcex_test_support::ResourceBuilder;
use similar_asserts::assert_eq;
use tokio_util::sync::CancellationToken;

fn registry() -> CasRegistry {
    CasRegistry::new(
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemoryManifestStore::new()),
    )
}

fn ct() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn put_get_roundtrip() {
    let registry = registry();
    let resource = ResourceBuilder::start()
        .name("hello")
        .tag("1.0.0")
        .file("content", "Hello, World!")
        .file("extra/notes.md", "# Notes")
        .build();

    registry.put(&resource, &ct()).await.unwrap();

    let fetched = registry
        .get(&Locator::parse("hello:1.0.0").unwrap())
        .await
        .unwrap();

    assert_eq!(fetched.identifier, resource.identifier);
    assert_eq!(
        fetched.archive.digest().unwrap(),
        resource.archive.digest().unwrap()
    );
    assert_eq!(
        archive::unpack(&fetched.archive).unwrap(),
        archive::unpack(&resource.archive).unwrap()
    );
    fetched.verify().unwrap();
}

#[tokio::test]
async fn shared_file_bytes_are_stored_once() {
    let registry = registry();
    let a = ResourceBuilder::start()
        .name("first")
        .file("payload", "shared")
        .file("only-in-a", "alpha")
        .build();
    let b = ResourceBuilder::start()
        .name("second")
        .file("payload", "shared")
        .file("only-in-b", "beta")
        .build();

    registry.put(&a, &ct()).await.unwrap();
    registry.put(&b, &ct()).await.unwrap();

    let blobs = registry.blob_store().list().await.unwrap();
    let shared = Checksum::compute(b"shared");
    assert_eq!(blobs.iter().filter(|d| **d == shared).count(), 1);
    assert_eq!(blobs.len(), 3);

    let manifests = registry.list(&SearchOptions::default()).await.unwrap();
    assert_eq!(manifests.total, 2);
}

#[tokio::test]
async fn gc_collects_only_after_remove() {
    let registry = registry();
    let resource = ResourceBuilder::start()
        .name("tmp")
        .tag("1.0.0")
        .file("unique", "one of a kind")
        .build();
    let unique = Checksum::compute(b"one of a kind");

    registry.put(&resource, &ct()).await.unwrap();
    assert_eq!(registry.gc().await.unwrap(), 0);

    registry
        .remove(&Locator::parse("tmp:1.0.0").unwrap())
        .await
        .unwrap();

    // Blobs survive removal until GC runs.
    assert!(registry.blob_store().has(&unique).await.unwrap());
    assert_eq!(registry.gc().await.unwrap(), 1);
    assert!(!registry.blob_store().has(&unique).await.unwrap());
}

#[tokio::test]
async fn gc_is_sound_and_complete() {
    let registry = registry();
    let keep = ResourceBuilder::start()
        .name("keep")
        .file("payload", "shared")
        .file("keep-only", "keep")
        .build();
    let drop_ = ResourceBuilder::start()
        .name("drop")
        .file("payload", "shared")
        .file("drop-only", "drop")
        .build();

    registry.put(&keep, &ct()).await.unwrap();
    registry.put(&drop_, &ct()).await.unwrap();
    registry.remove(&Locator::parse("drop").unwrap()).await.unwrap();

    assert_eq!(registry.gc().await.unwrap(), 1);

    // Soundness: everything a surviving manifest references is present.
    let survivors = registry.list(&SearchOptions::default()).await.unwrap();
    for (_, manifest) in &survivors.entries {
        for digest in manifest.files.values() {
            assert!(registry.blob_store().has(digest).await.unwrap());
        }
    }

    // Completeness: everything present is referenced by some manifest.
    let reachable: Vec<Checksum> = survivors
        .entries
        .iter()
        .flat_map(|(_, m)| m.files.values().copied())
        .collect();
    for digest in registry.blob_store().list().await.unwrap() {
        assert!(reachable.contains(&digest));
    }
}

#[tokio::test]
async fn latest_follows_the_most_recent_put() {
    let registry = registry();
    for (tag, body) in [("1.0.0", "first"), ("2.0.0", "second")] {
        let resource = ResourceBuilder::start()
            .name("foo")
            .tag(tag)
            .file("content", body)
            .build();
        registry.put(&resource, &ct()).await.unwrap();
    }

    let latest = registry.get(&Locator::parse("foo").unwrap()).await.unwrap();
    let concrete = registry
        .get(&Locator::parse("foo:2.0.0").unwrap())
        .await
        .unwrap();

    assert_eq!(latest.identifier, concrete.identifier);
    assert_eq!(latest.manifest.definition.tag, "2.0.0");
    assert_eq!(
        archive::unpack(&latest.archive).unwrap().get("content"),
        Some(&b"second"[..])
    );
}

#[tokio::test]
async fn latest_falls_back_to_last_created_tag_without_pointer() {
    let registry = registry();

    // Populate the manifest store behind the registry's back, the way an
    // external writer would: entries but no tag pointer.
    for tag in ["1.0.0", "1.1.0"] {
        let resource = ResourceBuilder::start()
            .name("legacy")
            .tag(tag)
            .file("content", tag)
            .build();
        let key = ManifestKey::new(None, "legacy", tag);
        let stored = StoredManifest::new(
            resource.manifest.definition.clone(),
            resource.manifest.archive.files.clone(),
        );
        registry.manifest_store().put(&key, stored).await.unwrap();
        // The blobs still need to exist for `get` to succeed.
        registry.blob_store().put(tag.as_bytes()).await.unwrap();
    }

    assert!(registry.has(&Locator::parse("legacy").unwrap()).await.unwrap());
    let fetched = registry
        .get(&Locator::parse("legacy").unwrap())
        .await
        .unwrap();
    assert_eq!(fetched.identifier.tag(), "1.1.0");
}

#[tokio::test]
async fn remove_is_a_noop_on_missing_entries() {
    let registry = registry();
    registry
        .remove(&Locator::parse("ghost:1.0.0").unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn get_missing_is_resource_not_found() {
    let registry = registry();
    let err = registry
        .get(&Locator::parse("ghost:1.0.0").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        kind_of(&err),
        Some(ResourceXError::ResourceNotFound { .. })
    ));
    assert!(!registry.has(&Locator::parse("ghost").unwrap()).await.unwrap());
}

#[tokio::test]
async fn missing_blob_is_corrupt_state_not_a_miss() {
    let registry = registry();
    let resource = ResourceBuilder::start()
        .name("fragile")
        .tag("1.0.0")
        .file("content", "precious")
        .build();
    registry.put(&resource, &ct()).await.unwrap();

    registry
        .blob_store()
        .delete(&Checksum::compute(b"precious"))
        .await
        .unwrap();

    let err = registry
        .get(&Locator::parse("fragile:1.0.0").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        kind_of(&err),
        Some(ResourceXError::CorruptState { .. })
    ));
}

#[tokio::test]
async fn clear_cache_drops_remote_manifests_only() {
    let registry = registry();
    let local = ResourceBuilder::start()
        .name("local-one")
        .file("content", "local")
        .build();
    let remote = ResourceBuilder::start()
        .name("remote-one")
        .registry("example.com")
        .file("content", "remote")
        .build();

    registry.put(&local, &ct()).await.unwrap();
    registry.put(&remote, &ct()).await.unwrap();

    let removed = registry.clear_cache(Some("example.com")).await.unwrap();
    assert_eq!(removed, 1);

    let left = registry.list(&SearchOptions::default()).await.unwrap();
    assert_eq!(left.total, 1);
    assert_eq!(left.entries[0].0.name, "local-one");

    // Blobs are untouched; the remote's bytes are now garbage.
    assert!(registry
        .blob_store()
        .has(&Checksum::compute(b"remote"))
        .await
        .unwrap());
    assert_eq!(registry.gc().await.unwrap(), 1);
}

#[tokio::test]
async fn cancelled_put_writes_no_manifest() {
    let registry = registry();
    let resource = ResourceBuilder::start()
        .name("doomed")
        .tag("1.0.0")
        .file("content", "never indexed")
        .build();

    let ct = CancellationToken::new();
    ct.cancel();
    let err = registry.put(&resource, &ct).await.unwrap_err();
    assert!(resourcex::core::errors::is_cancelled(&err));

    assert!(!registry
        .has(&Locator::parse("doomed:1.0.0").unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn list_filters_by_registry_namespace() {
    let registry = registry();
    let local = ResourceBuilder::start().name("mine").file("c", "1").build();
    let remote = ResourceBuilder::start()
        .name("theirs")
        .registry("example.com")
        .file("c", "2")
        .build();
    registry.put(&local, &ct()).await.unwrap();
    registry.put(&remote, &ct()).await.unwrap();

    let locals = registry
        .list(&SearchOptions {
            registry: RegistryFilter::Local,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(locals.total, 1);
    assert_eq!(locals.entries[0].0.name, "mine");

    let named = registry
        .list(&SearchOptions {
            registry: RegistryFilter::Named("example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(named.total, 1);
    assert_eq!(named.entries[0].0.name, "theirs");
}
