//! Application state shared across handlers.

use std::sync::Arc;

use axum::body::Body;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::session::SessionService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry and process supervision.
    pub sessions: Arc<SessionService>,
    /// HTTP client for proxying plain requests to session backends.
    pub http_client: Client<HttpConnector, Body>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();
        Self {
            sessions,
            http_client,
        }
    }
}
