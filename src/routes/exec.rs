//! One-shot command execution.
//!
//! - `POST /api/system/exec` — run `<shell> -c <command>` in the workspace root
//!
//! This is the "run this string, get stdout/stderr" facility the UI uses for
//! tool installs and status checks. Nothing here touches sessions.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::shell::process::{self, ExecResult};
use crate::util::expand_tilde;
use crate::AppState;

/// Request body for `POST /api/system/exec`.
#[derive(Deserialize)]
pub struct ExecRequest {
    /// Shell command string (passed to `<shell> -c`).
    pub command: String,
    /// Per-request timeout in milliseconds. Defaults to `server.exec_timeout_ms`.
    pub timeout_ms: Option<u64>,
}

/// `POST /api/system/exec` — execute a single shell command.
///
/// # Errors
///
/// - `504 Gateway Timeout` with `{"code":"TIMEOUT"}` — command exceeded its timeout
/// - `500 Internal Server Error` with `{"code":"EXEC_FAILED"}` — spawn or wait failure
pub async fn exec(
    State(state): State<AppState>,
    Json(payload): Json<ExecRequest>,
) -> Result<Json<ExecResult>, (StatusCode, Json<Value>)> {
    let timeout = payload
        .timeout_ms
        .unwrap_or(state.config.server.exec_timeout_ms);
    let shell = &state.config.shell;
    let working_dir = expand_tilde(&shell.workspace_root).into_owned();
    if let Err(e) = tokio::fs::create_dir_all(&working_dir).await {
        warn!("Exec: cannot create {working_dir}: {e}");
    }

    info!("Exec: {}", payload.command);
    match process::exec_command(
        &shell.program,
        std::path::Path::new(&working_dir),
        &payload.command,
        timeout,
    )
    .await
    {
        Ok(result) => Ok(Json(result)),
        Err(process::ExecError::Timeout) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({"error": "Command timed out", "code": "TIMEOUT"})),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string(), "code": "EXEC_FAILED"})),
        )),
    }
}
