use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::Router;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, extract::State};
use resourcex::WELL_KNOWN_PATH;
use resourcex::protocol::server;
use resourcex::registry::CasRegistry;
use resourcex::store::{MemoryBlobStore, MemoryManifestStore};
use serde_json::json;
use url::Url;

/// An ephemeral wire registry over in-memory stores, bound to port 0 on
/// loopback. Counts incoming requests so tests can assert on (the absence
/// of) network traffic. Requires an ambient tokio runtime; shuts down
/// gracefully on drop.
pub struct TestRegistry {
    pub registry: Arc<CasRegistry>,
    addr: SocketAddr,
    hits: Arc<AtomicU32>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestRegistry {
    pub fn serve() -> Self {
        let registry = Arc::new(CasRegistry::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryManifestStore::new()),
        ));
        Self::serve_with(registry.clone())
    }

    pub fn serve_with(registry: Arc<CasRegistry>) -> Self {
        let hits = Arc::new(AtomicU32::new(0));
        let app = server::app(registry.clone())
            .layer(middleware::from_fn_with_state(hits.clone(), count_requests));

        let (addr, shutdown) = spawn_app(app);
        Self {
            registry,
            addr,
            hits,
            shutdown: Some(shutdown),
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }

    /// Host:port authority, usable as a locator registry component.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Number of HTTP requests this server has received.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown.take().map(|shutdown| shutdown.send(()));
    }
}

async fn count_requests<B>(
    State(hits): State<Arc<AtomicU32>>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    hits.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}

/// Serves a `/.well-known/resourcex` document advertising the given
/// registry endpoints. Its authority doubles as the "domain" of locators in
/// discovery tests.
pub struct WellKnownServer {
    addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl WellKnownServer {
    pub fn serve(registries: Vec<Url>) -> Self {
        let registries: Vec<String> = registries.into_iter().map(String::from).collect();
        let app = Router::new().route(
            WELL_KNOWN_PATH,
            get(move || async move {
                Json(json!({
                    "version": "1",
                    "registries": registries,
                }))
            }),
        );

        let (addr, shutdown) = spawn_app(app);
        Self {
            addr,
            shutdown: Some(shutdown),
        }
    }

    /// Host:port authority, usable as a locator registry component.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for WellKnownServer {
    fn drop(&mut self) {
        let _ = self.shutdown.take().map(|shutdown| shutdown.send(()));
    }
}

fn spawn_app(app: Router) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = tcp.local_addr().unwrap();
    let (shutdown, rx) = tokio::sync::oneshot::channel::<()>();

    let server = axum::Server::from_tcp(tcp)
        .unwrap()
        .serve(app.into_make_service());

    tokio::spawn(async move {
        let graceful = server.with_graceful_shutdown(async {
            rx.await.ok();
        });
        let _ = graceful.await;
    });

    (addr, shutdown)
}
