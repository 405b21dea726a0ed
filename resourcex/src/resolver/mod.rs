//! The client-side resolution pipeline: a layered lookup that consults the
//! dev link index, the local store, an optional mirror, and finally the
//! origin registry found through well-known discovery.

mod discovery;
mod link;

pub use discovery::Discovery;
pub use link::LinkIndex;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::archive;
use crate::core::errors::{ResourceXError, is_cancelled};
use crate::core::fileset::FileSet;
use crate::core::locator::Locator;
use crate::core::resource::Resource;
use crate::protocol::client::fetch_from_endpoint;
use crate::registry::CasRegistry;
use crate::registry::executor::ExecutorRegistry;
use crate::sources::{Source, SourcePipeline};

/// A resolved resource with its archive already extracted and verified,
/// ready to hand to an executor.
pub struct ResolvedResource {
    pub resource: Resource,
    pub files: FileSet,
}

pub struct Resolver {
    registry: Arc<CasRegistry>,
    links: Arc<LinkIndex>,
    pipeline: SourcePipeline,
    discovery: Discovery,
    executors: ExecutorRegistry,
    mirror: Option<Url>,
    http: reqwest::Client,
}

pub struct ResolverBuilder {
    registry: Arc<CasRegistry>,
    links: Option<Arc<LinkIndex>>,
    executors: ExecutorRegistry,
    mirror: Option<Url>,
    http: Option<reqwest::Client>,
}

impl ResolverBuilder {
    pub fn links(mut self, links: Arc<LinkIndex>) -> Self {
        self.links = Some(links);
        self
    }

    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    /// An explicit mirror consulted before origin discovery.
    pub fn mirror(mut self, mirror: Url) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Resolver {
        let http = self.http.unwrap_or_default();
        Resolver {
            registry: self.registry,
            links: self.links.unwrap_or_else(|| Arc::new(LinkIndex::in_memory())),
            pipeline: SourcePipeline::new(http.clone()),
            discovery: Discovery::new(http.clone()),
            executors: self.executors,
            mirror: self.mirror,
            http,
        }
    }
}

impl Resolver {
    pub fn builder(registry: Arc<CasRegistry>) -> ResolverBuilder {
        ResolverBuilder {
            registry,
            links: None,
            executors: ExecutorRegistry::new(),
            mirror: None,
            http: None,
        }
    }

    pub fn registry(&self) -> &Arc<CasRegistry> {
        &self.registry
    }

    pub fn links(&self) -> &Arc<LinkIndex> {
        &self.links
    }

    pub fn source_pipeline(&self) -> &SourcePipeline {
        &self.pipeline
    }

    /// Ingest an arbitrary source and store the result locally.
    ///
    /// When the source is already stored and its loader reports it
    /// unchanged since the stored copy was written, the stored copy is
    /// returned without re-ingesting.
    pub async fn ingest(&self, source: &Source, ct: &CancellationToken) -> Result<Resource> {
        let resource = self.pipeline.resolve_source(source, ct).await?;

        let key = crate::store::ManifestKey::from_locator(&resource.identifier);
        if let Some(stored) = self.registry.manifest_store().get(&key).await?
            && self.pipeline.is_fresh(source, stored.updated_at).await?
        {
            debug!(identifier = %resource.identifier, "source unchanged, keeping stored copy");
            return self.registry.get(&resource.identifier).await;
        }

        self.registry.put(&resource, ct).await?;
        Ok(resource)
    }

    /// Fetch a resource through the tiered lookup.
    ///
    /// Tiers, in order: the link index (dev trees, re-read every time and
    /// never cached), the local store, then, for non-local locators only,
    /// the configured mirror and the origin registry found through
    /// discovery. Remote hits are written back to the local store before
    /// returning, with the registry prefix re-attached.
    #[tracing::instrument(level = "debug", skip(self, ct))]
    pub async fn get(&self, locator: &Locator, ct: &CancellationToken) -> Result<Resource> {
        // Dev links shadow everything and are never written back.
        if let Some(path) = self.links.lookup(locator) {
            debug!(%locator, path = %path, "resolved through link index");
            return self
                .pipeline
                .resolve_source(&Source::Path(path), ct)
                .await;
        }

        if self.registry.has(locator).await? {
            debug!(%locator, "resolved locally");
            return self.registry.get(locator).await;
        }

        // Local locators never leave the process.
        if locator.is_local() {
            return Err(ResourceXError::ResourceNotFound {
                locator: locator.to_string(),
            }
            .into());
        }
        if ct.is_cancelled() {
            return Err(ResourceXError::Cancelled.into());
        }

        if let Some(mirror) = &self.mirror {
            match fetch_from_endpoint(&self.http, mirror, locator, ct).await {
                Ok(resource) => {
                    debug!(%locator, %mirror, "resolved through mirror");
                    return self.write_back(resource, locator, ct).await;
                }
                Err(err) if is_cancelled(&err) => return Err(err),
                // A mirror is best effort: any miss or failure falls
                // through to the origin.
                Err(err) => {
                    debug!(%locator, %mirror, reason = %err, "mirror missed, trying origin");
                }
            }
        }

        let domain = locator
            .registry()
            .expect("non-local locator has a registry");
        let endpoint = self.discovery.discover(domain, ct).await?;
        let resource = fetch_from_endpoint(&self.http, &endpoint, locator, ct)
            .await
            .with_context(|| format!("failed to fetch `{locator}` from `{endpoint}`"))?;
        debug!(%locator, %endpoint, "resolved through origin");
        self.write_back(resource, locator, ct).await
    }

    /// Resolve and extract, verifying the archive digest against the
    /// manifest before anything downstream may observe the files.
    pub async fn resolve(
        &self,
        locator: &Locator,
        ct: &CancellationToken,
    ) -> Result<ResolvedResource> {
        let resource = self.get(locator, ct).await?;

        let files = archive::unpack(&resource.archive)?;
        let actual = crate::core::checksum::digest_file_set(&files.digests());
        if actual != resource.manifest.archive.digest {
            return Err(ResourceXError::CorruptState {
                reason: format!(
                    "archive for `{}` hashes to {actual}, manifest says {}",
                    resource.identifier, resource.manifest.archive.digest
                ),
            }
            .into());
        }

        Ok(ResolvedResource { resource, files })
    }

    /// Resolve, then dispatch to the executor registered for the resource
    /// type.
    pub async fn execute(
        &self,
        locator: &Locator,
        args: Option<&Value>,
        ct: &CancellationToken,
    ) -> Result<Value> {
        let resolved = self.resolve(locator, ct).await?;
        self.executors
            .execute(
                &resolved.resource.manifest.definition.resource_type,
                &resolved.files,
                args,
            )
            .await
    }

    /// Cache a remotely fetched resource under its registry prefix. The
    /// server stored it registry-less (the server *is* the registry); the
    /// prefix comes back from the locator we asked for.
    async fn write_back(
        &self,
        resource: Resource,
        locator: &Locator,
        ct: &CancellationToken,
    ) -> Result<Resource> {
        let registry = locator
            .registry()
            .expect("write-back only happens for remote locators");

        let mut resource = resource;
        resource.identifier = resource.identifier.with_registry(registry);
        resource.manifest.definition.registry = Some(registry.to_string());

        self.registry.put(&resource, ct).await?;
        Ok(resource)
    }
}
