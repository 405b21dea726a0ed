//! Server side of the wire protocol: an axum router over a CAS registry.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::API_PREFIX;
use crate::archive::{self, Archive};
use crate::core::locator::Locator;
use crate::core::manifest::{ArchiveSection, Manifest};
use crate::core::resource::Resource;
use crate::protocol::error::{ApiError, codes};
use crate::protocol::{PublishResponse, SearchResponse, SearchRow, WireManifest};
use crate::registry::CasRegistry;
use crate::store::SearchOptions;

#[derive(Clone)]
struct ServerState {
    registry: Arc<CasRegistry>,
}

/// The wire API mounted under [`API_PREFIX`].
pub fn app(registry: Arc<CasRegistry>) -> Router {
    let api = Router::new()
        .route("/publish", post(publish))
        .route(
            "/resource/*locator",
            get(get_resource).head(head_resource).delete(delete_resource),
        )
        .route("/content/*locator", get(get_content))
        .route("/search", get(search));

    Router::new()
        .nest(API_PREFIX, api)
        .with_state(ServerState { registry })
}

/// A registry server bound to an ephemeral local port, shut down gracefully
/// on drop. Requires an ambient tokio runtime.
pub struct RegistryHttpServer {
    addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl RegistryHttpServer {
    pub fn spawn(registry: Arc<CasRegistry>) -> Result<Self> {
        let tcp = TcpListener::bind("127.0.0.1:0").context("failed to bind server socket")?;
        Self::spawn_on(registry, tcp)
    }

    pub fn spawn_on(registry: Arc<CasRegistry>, tcp: TcpListener) -> Result<Self> {
        let addr = tcp.local_addr().context("failed to read bound address")?;
        let (shutdown, rx) = tokio::sync::oneshot::channel::<()>();

        let server = axum::Server::from_tcp(tcp)
            .context("failed to start server from socket")?
            .serve(app(registry).into_make_service());

        tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                rx.await.ok();
            });
            let _ = graceful.await;
        });

        debug!(%addr, "registry server listening");
        Ok(Self {
            addr,
            shutdown: Some(shutdown),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("bound address forms a valid URL")
    }
}

impl Drop for RegistryHttpServer {
    fn drop(&mut self) {
        let _ = self.shutdown.take().map(|shutdown| shutdown.send(()));
    }
}

/// Parse a wire locator and strip any client-side registry prefix: the
/// server itself is the registry resources are stored under.
fn parse_wire_locator(input: &str) -> Result<Locator, ApiError> {
    let locator = Locator::parse(input).map_err(ApiError::from)?;
    Ok(locator.without_registry())
}

async fn publish(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut locator_field: Option<String> = None;
    let mut manifest_field: Option<Vec<u8>> = None;
    let mut content_field: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ApiError::bad_request(codes::INVALID_MANIFEST, format!("malformed multipart body: {err}"))
    })? {
        let name = field.name().map(str::to_string);
        let bytes = field.bytes().await.map_err(|err| {
            ApiError::bad_request(codes::INVALID_MANIFEST, format!("failed to read field: {err}"))
        })?;
        match name.as_deref() {
            Some("locator") => {
                locator_field = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Some("manifest") => manifest_field = Some(bytes.to_vec()),
            Some("content") => content_field = Some(bytes.to_vec()),
            _ => {}
        }
    }

    let Some(locator_field) = locator_field else {
        return Err(ApiError::bad_request(
            codes::LOCATOR_REQUIRED,
            "multipart field `locator` is required",
        ));
    };
    let Some(manifest_field) = manifest_field else {
        return Err(ApiError::bad_request(
            codes::MANIFEST_REQUIRED,
            "multipart field `manifest` is required",
        ));
    };
    let Some(content_field) = content_field else {
        return Err(ApiError::bad_request(
            codes::CONTENT_REQUIRED,
            "multipart field `content` is required",
        ));
    };

    let locator = parse_wire_locator(&locator_field)?;

    let wire: WireManifest = serde_json::from_slice(&manifest_field).map_err(|err| {
        ApiError::bad_request(codes::INVALID_MANIFEST, format!("malformed manifest: {err}"))
    })?;

    let mut definition = wire.definition;
    definition.registry = None;
    definition.validate().map_err(|err| {
        ApiError::bad_request(codes::INVALID_MANIFEST, err.to_string())
    })?;
    if definition.name != locator.name() {
        return Err(ApiError::bad_request(
            codes::INVALID_MANIFEST,
            format!(
                "manifest names `{}` but the locator says `{}`",
                definition.name,
                locator.name()
            ),
        ));
    }

    // The locator's explicit tag wins; an omitted one falls back to the
    // manifest's.
    let identifier = if locator.has_default_tag() && definition.tag != locator.tag() {
        locator.with_tag(&definition.tag)
    } else {
        locator
    };
    definition.tag = identifier.tag().to_string();
    definition.path = identifier.path().map(str::to_string);

    let archive = Archive::from_bytes(content_field);
    let files = archive::unpack(&archive).map_err(ApiError::from)?;

    let manifest = Manifest {
        definition,
        archive: ArchiveSection::from_file_digests(files.digests()),
        source: files.source_section(),
    };
    let resource = Resource::new(identifier.clone(), manifest, archive);

    state
        .registry
        .put(&resource, &CancellationToken::new())
        .await
        .map_err(ApiError::from)?;

    let body = PublishResponse {
        locator: identifier.to_canonical_string(),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_resource(
    State(state): State<ServerState>,
    Path(locator): Path<String>,
) -> Result<Response, ApiError> {
    let locator = parse_wire_locator(&locator)?;
    let resource = state.registry.get(&locator).await.map_err(ApiError::from)?;
    Ok(Json(resource.manifest.definition).into_response())
}

async fn head_resource(
    State(state): State<ServerState>,
    Path(locator): Path<String>,
) -> Result<StatusCode, ApiError> {
    let locator = parse_wire_locator(&locator)?;
    let present = state.registry.has(&locator).await.map_err(ApiError::from)?;
    Ok(if present {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn delete_resource(
    State(state): State<ServerState>,
    Path(locator): Path<String>,
) -> Result<StatusCode, ApiError> {
    let locator = parse_wire_locator(&locator)?;
    if !state.registry.has(&locator).await.map_err(ApiError::from)? {
        return Err(ApiError::not_found(format!("resource not found: {locator}")));
    }
    state.registry.remove(&locator).await.map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_content(
    State(state): State<ServerState>,
    Path(locator): Path<String>,
) -> Result<Response, ApiError> {
    let locator = parse_wire_locator(&locator)?;
    let resource = state.registry.get(&locator).await.map_err(ApiError::from)?;
    let bytes = resource.archive.into_bytes();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/gzip"));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"archive.tar.gz\""),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
    Ok((headers, bytes).into_response())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn search(
    State(state): State<ServerState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let opts = SearchOptions {
        query: params.q,
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
        ..Default::default()
    };
    let results = state.registry.list(&opts).await.map_err(ApiError::from)?;

    let rows = results
        .entries
        .into_iter()
        .map(|(key, stored)| {
            let locator = Locator::from_parts(
                key.registry.as_deref(),
                stored.definition.path.as_deref(),
                &key.name,
                &key.tag,
            );
            SearchRow {
                locator: locator.to_canonical_string(),
                registry: key.registry,
                path: stored.definition.path.clone(),
                name: key.name,
                resource_type: stored.definition.resource_type,
                tag: key.tag,
            }
        })
        .collect();

    Ok(Json(SearchResponse {
        results: rows,
        total: results.total,
    })
    .into_response())
}
