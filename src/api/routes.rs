//! API route definitions.

use std::path::Path;

use axum::{
    routing::{any, delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws;

use super::handlers;
use super::proxy;
use super::state::AppState;

/// Create the application router.
///
/// `static_dir`, when given, is served for all non-API paths with an SPA
/// fallback to its `index.html`.
pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        // Session management
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/api/sessions/shells", get(handlers::list_shells))
        .route("/api/sessions/{name}/stop", post(handlers::stop_session))
        .route(
            "/api/sessions/{name}/restart",
            post(handlers::restart_session),
        )
        .route("/api/sessions/{name}", delete(handlers::delete_session))
        // Lifecycle event stream
        .route("/ws", get(ws::ws_handler))
        // Terminal proxy (plain and upgrade)
        .route("/terminal/{name}", any(proxy::proxy_terminal_root))
        .route("/terminal/{name}/{*path}", any(proxy::proxy_terminal_path));

    if let Some(dir) = static_dir {
        let serve = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        router = router.fallback_service(serve);
    }

    router
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
