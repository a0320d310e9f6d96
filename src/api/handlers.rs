//! REST handlers for the session lifecycle API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::session::SessionRecord;
use crate::shells::Shell;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub shell: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ShellsResponse {
    pub shells: Vec<Shell>,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionRecord>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/sessions/shells
pub async fn list_shells(State(state): State<AppState>) -> Json<ShellsResponse> {
    Json(ShellsResponse {
        shells: state.sessions.shells().list().to_vec(),
    })
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.list().await,
    })
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionRecord>)> {
    let record = state.sessions.create(request.name, request.shell).await?;
    info!(name = %record.name, "created session");
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/sessions/{name}/stop
pub async fn stop_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    let record = state.sessions.stop(&name).await?;
    Ok(Json(record))
}

/// POST /api/sessions/{name}/restart
pub async fn restart_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    let record = state.sessions.restart(&name).await?;
    Ok(Json(record))
}

/// DELETE /api/sessions/{name}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    state.sessions.remove(&name).await?;
    Ok(Json(DeletedResponse { name }))
}
