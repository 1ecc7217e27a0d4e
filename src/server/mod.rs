//! HTTP surface.
//!
//! Thin axum layer over the engine: session CRUD, document upload,
//! GPT configuration, the streaming chat endpoint, and health.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::engine::Engine;

/// Builds the API router over a shared engine.
#[must_use]
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/sessions", post(handlers::create_session))
        .route(
            "/api/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/api/sessions/{id}/gpt-config",
            post(handlers::set_gpt_config),
        )
        .route(
            "/api/sessions/{id}/add-documents",
            post(handlers::add_documents),
        )
        .route(
            "/api/sessions/{id}/documents",
            get(handlers::get_documents),
        )
        .route(
            "/api/sessions/{id}/chat/stream",
            post(handlers::chat_stream),
        )
        .route("/api/health", get(handlers::health))
        .with_state(engine)
}

/// Binds and serves the API until ctrl-c.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(engine: Arc<Engine>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
