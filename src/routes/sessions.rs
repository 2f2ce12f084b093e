//! REST endpoints for session management.
//!
//! - `POST   /api/sessions`              — create a session
//! - `GET    /api/sessions`              — list sessions in creation order
//! - `GET    /api/sessions/{id}`         — status probe
//! - `POST   /api/sessions/{id}/input`   — write raw input
//! - `POST   /api/sessions/{id}/resize`  — resize the terminal
//! - `DELETE /api/sessions/{id}`         — request termination

use axum::{
    extract::{Path, State},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SessionError;
use crate::sessions::SessionInfo;
use crate::AppState;

/// Request body for `POST /api/sessions`. Every field is optional; the body
/// itself may be omitted.
#[derive(Deserialize, Default)]
pub struct CreateSessionRequest {
    /// Project folder under the workspace root.
    pub project: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// `POST /api/sessions` — spawn a new shell session.
///
/// The shell may still be starting when this returns.
pub async fn create_session(
    State(state): State<AppState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<Json<Value>, SessionError> {
    let Json(req) = payload.unwrap_or_default();
    let cols = req.cols.unwrap_or(state.config.server.default_terminal_cols);
    let rows = req.rows.unwrap_or(state.config.server.default_terminal_rows);
    let session = state
        .sessions
        .create(req.project.as_deref(), cols, rows)
        .await?;
    Ok(Json(json!({
        "id": session.id,
        "project": session.project,
        "cols": cols,
        "rows": rows,
    })))
}

/// `GET /api/sessions` — all live sessions.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list().await)
}

/// `GET /api/sessions/{id}` — `{"status":"alive", ...}` or 404.
pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, SessionError> {
    let session = state.sessions.get(&id).await?;
    let info = SessionInfo::from(session.as_ref());
    Ok(Json(json!({
        "status": "alive",
        "id": info.id,
        "project": info.project,
        "cols": info.cols,
        "rows": info.rows,
        "created_at": info.created_at,
        "pid": info.pid,
        "attachments": info.attachments,
    })))
}

#[derive(Deserialize)]
pub struct InputRequest {
    pub data: String,
}

/// `POST /api/sessions/{id}/input` — write `data` verbatim to the session.
pub async fn send_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<InputRequest>,
) -> Result<Json<Value>, SessionError> {
    state
        .sessions
        .send_input(&id, Bytes::from(payload.data))
        .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// `POST /api/sessions/{id}/resize` — change terminal dimensions.
pub async fn resize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ResizeRequest>,
) -> Result<Json<Value>, SessionError> {
    state
        .sessions
        .resize(&id, payload.cols, payload.rows)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "cols": payload.cols,
        "rows": payload.rows,
    })))
}

/// `DELETE /api/sessions/{id}` — kill the session's process.
///
/// Removal from the registry follows once the process has exited.
pub async fn destroy_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, SessionError> {
    state.sessions.destroy(&id).await?;
    Ok(Json(json!({
        "ok": true,
        "id": id,
    })))
}
