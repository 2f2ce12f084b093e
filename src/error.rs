//! Error types shared by the session registry, the relay, and the HTTP layer.
//!
//! Every failure is scoped to the session or connection that caused it. The
//! HTTP mapping lives here so handlers can simply return
//! `Result<Json<_>, SessionError>` and let axum render the error body:
//!
//! ```json
//! { "error": "session abc123 not found", "code": "SESSION_NOT_FOUND" }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures reported by a [`crate::shell::ProcessBackend`] or one of its
/// process handles.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The OS refused to create the pseudo-terminal or the child process.
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    /// The process already exited; its input side is closed.
    #[error("process has already exited")]
    ProcessGone,
    /// The window-size change was rejected.
    #[error("failed to resize terminal: {0}")]
    Resize(String),
}

/// Errors surfaced by [`crate::sessions::SessionManager`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn session: {0}")]
    Spawn(String),
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} process has already exited")]
    ProcessGone(String),
    #[error("failed to resize session: {0}")]
    Resize(String),
    #[error("session limit reached (max {0})")]
    LimitReached(usize),
    #[error("invalid project name: {0:?}")]
    InvalidProject(String),
}

impl SessionError {
    /// Map a backend failure onto the registry taxonomy for `session_id`.
    pub fn from_backend(session_id: &str, err: BackendError) -> Self {
        match err {
            BackendError::Spawn(e) => SessionError::Spawn(e),
            BackendError::ProcessGone => SessionError::ProcessGone(session_id.to_string()),
            BackendError::Resize(e) => SessionError::Resize(e),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Spawn(_) => "SPAWN_FAILED",
            SessionError::NotFound(_) => "SESSION_NOT_FOUND",
            SessionError::ProcessGone(_) => "PROCESS_GONE",
            SessionError::Resize(_) => "RESIZE_FAILED",
            SessionError::LimitReached(_) => "SESSION_LIMIT",
            SessionError::InvalidProject(_) => "INVALID_PROJECT",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::ProcessGone(_) => StatusCode::CONFLICT,
            SessionError::Resize(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::LimitReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::InvalidProject(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({"error": self.to_string(), "code": self.code()})),
        )
            .into_response()
    }
}

/// Errors from [`crate::relay::RelayRouter`] link management.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Session(#[from] SessionError),
    /// A session cannot be paired with itself.
    #[error("cannot link session {0} to itself")]
    SelfLink(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::Session(e) => e.into_response(),
            RelayError::SelfLink(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": self.to_string(), "code": "INVALID_LINK"})),
            )
                .into_response(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        let e = SessionError::from_backend("abc", BackendError::ProcessGone);
        assert!(matches!(e, SessionError::ProcessGone(ref id) if id == "abc"));
        assert_eq!(e.code(), "PROCESS_GONE");

        let e = SessionError::from_backend("abc", BackendError::Spawn("no pty".into()));
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(e.to_string().contains("no pty"));
    }

    #[test]
    fn test_not_found_is_404() {
        let resp = SessionError::NotFound("zzz".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_self_link_is_400() {
        let resp = RelayError::SelfLink("a".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
