//! HTTP surface: routing, shared state, response envelope.

pub mod envelope;
pub mod handlers;

pub use envelope::{ok, ApiError, Envelope};

use crate::config::Config;
use crate::coord::{CoordBackend, HotCache, ServiceRegistry};
use crate::meta::MetaRepo;
use crate::peer::PeerClient;
use crate::scratch::Scratch;
use crate::signer::UrlSigner;
use crate::snowflake::IdGenerator;
use crate::storage::ObjectStore;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Everything a handler needs, threaded explicitly instead of globals.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ObjectStore>,
    pub meta: Arc<MetaRepo>,
    pub coord: Arc<dyn CoordBackend>,
    pub cache: HotCache,
    pub registry: ServiceRegistry,
    pub peers: PeerClient,
    pub ids: Arc<IdGenerator>,
    pub signer: UrlSigner,
    pub scratch: Scratch,
    /// Outbound IP advertised in the registry and locate replies.
    pub node_ip: String,
}

/// Build the router. Base path `/api/storage/v0`, JSON envelope on every
/// route.
pub fn router(state: Arc<AppState>) -> Router {
    let v0 = Router::new()
        // liveness
        .route("/ping", get(handlers::health::ping))
        .route("/health", get(handlers::health::health))
        // links
        .route("/link/upload", post(handlers::link::upload_link))
        .route("/link/download", post(handlers::link::download_link))
        // instant upload + chunk checkpoint
        .route("/resume", post(handlers::resume::resume))
        .route("/checkpoint", get(handlers::resume::checkpoint))
        // scratch locality
        .route("/proxy", get(handlers::proxy::locate))
        // uploads; DELETE removes the scratch directory (task engine verb)
        .route(
            "/upload",
            put(handlers::upload::upload_single).delete(handlers::upload::delete_scratch),
        )
        .route("/upload/multi", put(handlers::upload::upload_part))
        .route("/upload/merge", put(handlers::upload::upload_merge))
        // downloads
        .route("/download", get(handlers::download::download));

    let max_body = state.config.max_body_size;
    Router::new()
        .nest("/api/storage/v0", v0)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(max_body))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
