use flate2::read::GzDecoder;
use resourcex::core::Locator;
use resourcex::protocol::client::{fetch_from_endpoint, publish_to_endpoint};
use resourcex::protocol::error::ErrorBody;
use resourcex::protocol::{PublishResponse, SearchResponse};
use resourcex_test_support::{ResourceBuilder, TestRegistry};
use std::io::Read;
use tokio_util::sync::CancellationToken;

fn ct() -> CancellationToken {
    CancellationToken::new()
}

fn http() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn publish_and_pull_roundtrip() {
    let server = TestRegistry::serve();
    let resource = ResourceBuilder::start()
        .name("hello")
        .resource_type("text")
        .tag("1.0.0")
        .file("content", "Hello, World!")
        .build();

    publish_to_endpoint(&http(), &server.url(), &resource, &ct())
        .await
        .unwrap();

    // The manifest endpoint serves the definition section.
    let definition: serde_json::Value = http()
        .get(format!("{}api/v1/resource/hello:1.0.0", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(definition["name"], "hello");
    assert_eq!(definition["type"], "text");
    assert_eq!(definition["tag"], "1.0.0");

    // The content endpoint streams the archive with the fixed headers.
    let response = http()
        .get(format!("{}api/v1/content/hello:1.0.0", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/gzip"
    );
    assert_eq!(
        response.headers()["content-disposition"].to_str().unwrap(),
        "attachment; filename=\"archive.tar.gz\""
    );
    let length: usize = response.headers()["content-length"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let bytes = response.bytes().await.unwrap();
    assert_eq!(bytes.len(), length);

    // The payload unpacks back to the published file.
    let mut tar_bytes = Vec::new();
    GzDecoder::new(&bytes[..])
        .read_to_end(&mut tar_bytes)
        .unwrap();
    let mut unpacked = tar::Archive::new(&tar_bytes[..]);
    let mut content = Vec::new();
    for entry in unpacked.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_str() == Some("content") {
            entry.read_to_end(&mut content).unwrap();
        }
    }
    assert_eq!(content, b"Hello, World!");
}

#[tokio::test]
async fn publish_returns_created_with_locator() {
    let server = TestRegistry::serve();

    let resource = ResourceBuilder::start()
        .name("hello")
        .tag("1.0.0")
        .file("content", "Hello, World!")
        .build();

    // Raw multipart, to observe the exact wire behavior.
    let manifest = serde_json::json!({
        "definition": {"name": "hello", "type": "text", "tag": "1.0.0"},
        "files": {},
    });
    let form = reqwest::multipart::Form::new()
        .text("locator", "hello:1.0.0")
        .part(
            "manifest",
            reqwest::multipart::Part::bytes(serde_json::to_vec(&manifest).unwrap())
                .file_name("manifest.json"),
        )
        .part(
            "content",
            reqwest::multipart::Part::bytes(resource.archive.as_bytes().to_vec())
                .file_name("archive.tar.gz"),
        );

    let response = http()
        .post(format!("{}api/v1/publish", server.url()))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: PublishResponse = response.json().await.unwrap();
    assert_eq!(body.locator, "hello:1.0.0");
}

#[tokio::test]
async fn publish_rejects_missing_fields_with_stable_codes() {
    let server = TestRegistry::serve();

    let cases: [(&str, &[&str]); 3] = [
        ("LOCATOR_REQUIRED", &["manifest", "content"]),
        ("MANIFEST_REQUIRED", &["locator", "content"]),
        ("CONTENT_REQUIRED", &["locator", "manifest"]),
    ];

    for (expected_code, fields) in cases {
        let mut form = reqwest::multipart::Form::new();
        for field in fields {
            form = match *field {
                "locator" => form.text("locator", "hello:1.0.0"),
                "manifest" => form.part(
                    "manifest",
                    reqwest::multipart::Part::bytes(
                        br#"{"definition":{"name":"hello","type":"text","tag":"1.0.0"}}"#.to_vec(),
                    )
                    .file_name("manifest.json"),
                ),
                "content" => form.part(
                    "content",
                    reqwest::multipart::Part::bytes(vec![0u8; 4]).file_name("archive.tar.gz"),
                ),
                _ => unreachable!(),
            };
        }

        let response = http()
            .post(format!("{}api/v1/publish", server.url()))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.code, expected_code);
    }
}

#[tokio::test]
async fn resource_lookup_errors() {
    let server = TestRegistry::serve();

    let response = http()
        .get(format!("{}api/v1/resource/ghost:1.0.0", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.code, "RESOURCE_NOT_FOUND");

    let response = http()
        .get(format!("{}api/v1/resource/a@b", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.code, "INVALID_LOCATOR");
}

#[tokio::test]
async fn head_and_delete_lifecycle() {
    let server = TestRegistry::serve();
    let resource = ResourceBuilder::start()
        .name("hello")
        .tag("1.0.0")
        .file("content", "x")
        .build();
    publish_to_endpoint(&http(), &server.url(), &resource, &ct())
        .await
        .unwrap();

    let url = format!("{}api/v1/resource/hello:1.0.0", server.url());

    let response = http().head(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let response = http().delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 204);

    let response = http().head(&url).send().await.unwrap();
    assert_eq!(response.status(), 404);

    // Deleting again reports the absence.
    let response = http().delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn delete_keeps_blobs() {
    let server = TestRegistry::serve();
    let resource = ResourceBuilder::start()
        .name("hello")
        .tag("1.0.0")
        .file("content", "kept bytes")
        .build();
    publish_to_endpoint(&http(), &server.url(), &resource, &ct())
        .await
        .unwrap();

    http()
        .delete(format!("{}api/v1/resource/hello:1.0.0", server.url()))
        .send()
        .await
        .unwrap();

    let digest = resourcex::core::Checksum::compute(b"kept bytes");
    assert!(server.registry.blob_store().has(&digest).await.unwrap());
}

#[tokio::test]
async fn search_filters_and_paginates() {
    let server = TestRegistry::serve();
    for name in ["alpha", "beta", "albatross"] {
        let resource = ResourceBuilder::start()
            .name(name)
            .tag("1.0.0")
            .file("content", name)
            .build();
        publish_to_endpoint(&http(), &server.url(), &resource, &ct())
            .await
            .unwrap();
    }

    let body: SearchResponse = http()
        .get(format!("{}api/v1/search?q=al", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.total, 2);
    let names: Vec<_> = body.results.iter().map(|row| row.name.as_str()).collect();
    assert_eq!(names, ["alpha", "albatross"]);
    assert_eq!(body.results[0].locator, "alpha:1.0.0");
    assert_eq!(body.results[0].resource_type, "text");

    let body: SearchResponse = http()
        .get(format!("{}api/v1/search?limit=1&offset=1", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.total, 3);
    assert_eq!(body.results.len(), 1);
    assert_eq!(body.results[0].name, "beta");
}

#[tokio::test]
async fn client_fetch_validates_and_strips_registry() {
    let server = TestRegistry::serve();
    let resource = ResourceBuilder::start()
        .name("hello")
        .tag("1.0.0")
        .file("content", "Hello, World!")
        .build();
    publish_to_endpoint(&http(), &server.url(), &resource, &ct())
        .await
        .unwrap();

    // The client asks with a registry-prefixed locator; the wire request
    // travels without the prefix and the response is registry-less.
    let locator = Locator::parse(&format!("{}/hello:1.0.0", server.authority())).unwrap();
    let fetched = fetch_from_endpoint(&http(), &server.url(), &locator, &ct())
        .await
        .unwrap();
    assert_eq!(fetched.identifier.registry(), None);
    assert_eq!(fetched.identifier.name(), "hello");
    fetched.verify().unwrap();

    let err = fetch_from_endpoint(
        &http(),
        &server.url(),
        &Locator::parse("ghost:1.0.0").unwrap(),
        &ct(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        resourcex::core::errors::kind_of(&err),
        Some(resourcex::core::ResourceXError::ResourceNotFound { .. })
    ));
}
