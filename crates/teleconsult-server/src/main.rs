//! Teleconsult development server
//!
//! Relays the live session socket between the participants of a session and
//! serves an in-memory document registry.
//!
//! ## Endpoints
//!
//! - `GET  /sesiones/{id}/ws` WebSocket; the first frame must be
//!   `{"type":"authenticate","data":{"token":"..."}}`
//! - `GET  /api/sesiones/{id}/documentos`
//! - `POST /api/sesiones/{id}/documentos` (multipart `archivo`, `categoria`)
//! - `POST /api/sesiones/{id}/documento-activo` (`{"documentId": "..."}`)
//! - `GET  /archivos/{id}`

mod config;
mod documents;
mod relay;
mod rooms;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use teleconsult_core::document::MAX_UPLOAD_BYTES;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::documents::DocumentStore;
use crate::rooms::Rooms;

/// Room for multipart framing and the `categoria` field on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub rooms: Rooms,
    pub documents: DocumentStore,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: Rooms::new(config.channel_capacity),
            documents: DocumentStore::new(config.public_url()),
            config,
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/sesiones/{session_id}/documentos",
            get(documents::list_documents)
                .post(documents::upload_document)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD)),
        )
        .route("/sesiones/{session_id}/documento-activo", post(documents::select_document));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/sesiones/{session_id}/ws", get(relay::ws_handler))
        .route("/archivos/{id}", get(documents::get_file))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teleconsult_server=info,tower_http=info".into()),
        )
        .init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let address = config.server_address();
    let state = Arc::new(AppState::new(config));

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot bind {}: {}", address, e);
            std::process::exit(1);
        }
    };
    info!("Teleconsult server listening on {}", address);
    info!("WebSocket endpoint: ws://{}/sesiones/{{session}}/ws", address);

    if let Err(e) = axum::serve(listener, router(state)).await {
        error!("Server error: {}", e);
    }
}

async fn index() -> &'static str {
    "Teleconsult server - connect via WebSocket at /sesiones/{id}/ws"
}

async fn health() -> &'static str {
    "ok"
}
