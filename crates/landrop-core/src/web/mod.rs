//! HTTP and WebSocket surface of the transfer server.
//!
//! One axum router carries everything a peer or local UI needs: pairing,
//! the streaming upload/download pair, discovery listings, and the
//! signaling WebSocket.

pub mod error;
pub mod handlers;
pub mod state;
pub mod ws;

use std::net::SocketAddr;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::error::Result;

pub use state::{AppState, SharedState};

/// Build the router for a given application state.
#[must_use]
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/identify", get(handlers::identify))
        .route("/pairing-code", get(handlers::pairing_code))
        .route("/upload", post(handlers::upload))
        .route("/api/files/{filename}", get(handlers::download_file))
        .route("/files/{filename}", get(handlers::download_file_legacy))
        .route("/files", get(handlers::list_files))
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/signaling/devices", get(handlers::signaling_devices))
        .route("/api/history", get(handlers::history))
        .route("/api/transfer/send", post(handlers::send_transfer))
        .route("/ws", get(ws::ws_handler))
        // Uploads are size-checked against the configured limit instead.
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the task is cancelled.
///
/// # Errors
///
/// Returns an error when the listening socket cannot be bound; this is
/// the only process-fatal failure in the server.
pub async fn serve(state: SharedState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Transfer server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
