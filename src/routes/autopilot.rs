//! Auto-pilot link management.
//!
//! - `POST /api/autopilot/link`   — pair two sessions
//! - `POST /api/autopilot/unlink` — stop a pair, optionally killing both
//! - `GET  /api/autopilot/links`  — list active directions
//!
//! Older clients send `agent1Id`/`agent2Id`; both spellings are accepted.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RelayError;
use crate::relay::LinkInfo;
use crate::AppState;

#[derive(Deserialize)]
pub struct LinkRequest {
    /// Uses the forward tag to address `target_id`.
    #[serde(alias = "agent1Id")]
    pub source_id: String,
    /// Uses the reply tag to answer.
    #[serde(alias = "agent2Id")]
    pub target_id: String,
}

#[derive(Deserialize)]
pub struct UnlinkRequest {
    #[serde(alias = "agent1Id")]
    pub source_id: String,
    #[serde(alias = "agent2Id")]
    pub target_id: String,
    /// Also destroy both sessions.
    #[serde(default)]
    pub kill: bool,
}

/// `POST /api/autopilot/link`
pub async fn link(
    State(state): State<AppState>,
    Json(payload): Json<LinkRequest>,
) -> Result<Json<Value>, RelayError> {
    state
        .relay
        .link(&payload.source_id, &payload.target_id)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "message": "Sessions linked",
    })))
}

/// `POST /api/autopilot/unlink`
pub async fn unlink(
    State(state): State<AppState>,
    Json(payload): Json<UnlinkRequest>,
) -> Json<Value> {
    let unlinked = state
        .relay
        .unlink(&payload.source_id, &payload.target_id, payload.kill)
        .await;
    Json(json!({
        "ok": true,
        "unlinked": unlinked,
    }))
}

/// `GET /api/autopilot/links`
pub async fn list_links(State(state): State<AppState>) -> Json<Vec<LinkInfo>> {
    Json(state.relay.list_links().await)
}
