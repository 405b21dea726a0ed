//! Client side of the wire protocol: manifest + content fetch, and
//! multipart publish.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::API_PREFIX;
use crate::archive::{self, Archive};
use crate::core::errors::ResourceXError;
use crate::core::locator::Locator;
use crate::core::manifest::{ArchiveSection, Definition, Manifest};
use crate::core::resource::Resource;
use crate::protocol::WireManifest;
use crate::protocol::error::codes;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetch a resource from a registry endpoint: manifest first, then the
/// archive bytes, then a consistency check of the two.
///
/// The locator travels without its registry prefix, since the server being
/// asked *is* the registry. The returned resource is registry-less for the
/// same reason; callers caching it locally re-attach the prefix.
pub async fn fetch_from_endpoint(
    http: &reqwest::Client,
    endpoint: &Url,
    locator: &Locator,
    ct: &CancellationToken,
) -> Result<Resource> {
    let wire_locator = locator.without_registry().to_canonical_string();

    let manifest_url = api_url(endpoint, &format!("resource/{wire_locator}"))?;
    let response = send(http.get(manifest_url).timeout(FETCH_TIMEOUT), ct).await?;
    let definition: Definition = match response.status() {
        StatusCode::NOT_FOUND => {
            return Err(ResourceXError::ResourceNotFound {
                locator: locator.to_string(),
            }
            .into());
        }
        status if status.is_success() => response
            .json()
            .await
            .map_err(|err| transport(format!("malformed manifest response: {err}")))?,
        status => {
            return Err(transport(format!(
                "manifest endpoint returned {status} for `{wire_locator}`"
            )));
        }
    };

    let content_url = api_url(endpoint, &format!("content/{wire_locator}"))?;
    let response = send(http.get(content_url).timeout(FETCH_TIMEOUT), ct).await?;
    let bytes = match response.status() {
        StatusCode::NOT_FOUND => {
            return Err(ResourceXError::ResourceNotFound {
                locator: locator.to_string(),
            }
            .into());
        }
        status if status.is_success() => {
            let mut bytes = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                if ct.is_cancelled() {
                    return Err(ResourceXError::Cancelled.into());
                }
                let chunk = chunk
                    .map_err(|err| transport(format!("failed to read content stream: {err}")))?;
                bytes.extend_from_slice(&chunk);
            }
            bytes
        }
        status => {
            return Err(transport(format!(
                "content endpoint returned {status} for `{wire_locator}`"
            )));
        }
    };

    debug!(locator = %wire_locator, bytes = bytes.len(), "fetched resource");

    let archive = Archive::from_bytes(bytes);
    let files = archive::unpack(&archive)
        .with_context(|| format!("registry sent a corrupt archive for `{wire_locator}`"))?;

    let manifest = Manifest {
        definition,
        archive: ArchiveSection::from_file_digests(files.digests()),
        source: files.source_section(),
    };
    let resource = Resource::new(manifest.definition.locator(), manifest, archive);
    resource
        .verify()
        .with_context(|| format!("registry sent an inconsistent resource for `{wire_locator}`"))?;
    Ok(resource)
}

/// Publish a resource to a registry endpoint as a multipart form with
/// `locator`, `manifest` and `content` parts.
pub async fn publish_to_endpoint(
    http: &reqwest::Client,
    endpoint: &Url,
    resource: &Resource,
    ct: &CancellationToken,
) -> Result<()> {
    let wire_locator = resource.identifier.without_registry().to_canonical_string();

    let mut definition = resource.manifest.definition.clone();
    definition.registry = None;
    let manifest = WireManifest {
        definition,
        files: resource.manifest.archive.files.clone(),
    };

    let form = Form::new()
        .text("locator", wire_locator.clone())
        .part(
            "manifest",
            Part::bytes(serde_json::to_vec(&manifest)?)
                .file_name("manifest.json")
                .mime_str("application/json")?,
        )
        .part(
            "content",
            Part::bytes(resource.archive.as_bytes().to_vec())
                .file_name("archive.tar.gz")
                .mime_str("application/gzip")?,
        );

    let url = api_url(endpoint, "publish")?;
    let response = send(http.post(url).multipart(form).timeout(PUBLISH_TIMEOUT), ct).await?;

    match response.status() {
        StatusCode::CREATED => {
            debug!(locator = %wire_locator, "published resource");
            Ok(())
        }
        StatusCode::UNAUTHORIZED => {
            anyhow::bail!("registry rejected credentials for `{wire_locator}`")
        }
        StatusCode::FORBIDDEN => {
            anyhow::bail!("not allowed to publish `{wire_locator}` to this registry")
        }
        StatusCode::CONFLICT => {
            anyhow::bail!("`{wire_locator}` already exists in this registry")
        }
        status => {
            let code = response
                .json::<crate::protocol::error::ErrorBody>()
                .await
                .map(|body| body.code)
                .unwrap_or_else(|_| codes::INTERNAL_ERROR.to_string());
            Err(transport(format!(
                "publish of `{wire_locator}` failed with {status} ({code})"
            )))
        }
    }
}

/// Join an endpoint base with an API-prefixed suffix, tolerating trailing
/// slashes in the base.
fn api_url(endpoint: &Url, suffix: &str) -> Result<Url> {
    let base = endpoint.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}{API_PREFIX}/{suffix}"))
        .with_context(|| format!("cannot build API URL for `{suffix}`"))
}

async fn send(
    request: reqwest::RequestBuilder,
    ct: &CancellationToken,
) -> Result<reqwest::Response> {
    tokio::select! {
        _ = ct.cancelled() => Err(ResourceXError::Cancelled.into()),
        response = request.send() => response.map_err(|err| {
            if err.is_timeout() {
                ResourceXError::Timeout { reason: err.to_string() }.into()
            } else {
                transport(err)
            }
        }),
    }
}

fn transport(reason: impl std::fmt::Display) -> anyhow::Error {
    ResourceXError::Transport {
        reason: reason.to_string(),
    }
    .into()
}
