//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. [`router`] wires them
//! together with the WebSocket endpoint and the shared middleware.

pub mod autopilot;
pub mod exec;
pub mod health;
pub mod sessions;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{ws, AppState};

/// Build the full application router.
///
/// CORS is permissive because the browser UI is served from its own origin.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::health))
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/{id}",
            get(sessions::session_status).delete(sessions::destroy_session),
        )
        .route("/api/sessions/{id}/input", post(sessions::send_input))
        .route("/api/sessions/{id}/resize", post(sessions::resize_session))
        .route("/api/autopilot/link", post(autopilot::link))
        .route("/api/autopilot/unlink", post(autopilot::unlink))
        .route("/api/autopilot/links", get(autopilot::list_links))
        .route("/api/system/exec", post(exec::exec))
        .route("/api/ws", get(ws::ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
