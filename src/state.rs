//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::relay::RelayRouter;
use crate::sessions::SessionManager;
use crate::shell::ProcessBackend;

/// Shared application state for the shellmux server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The session registry.
    pub sessions: SessionManager,
    /// Auto-pilot links between sessions.
    pub relay: RelayRouter,
}

impl AppState {
    /// Build the registry and relay on top of `backend`. Must be called
    /// inside a tokio runtime.
    pub fn new(config: Arc<Config>, backend: Arc<dyn ProcessBackend>) -> Self {
        let sessions = SessionManager::new(Arc::clone(&config), backend);
        let relay = RelayRouter::new(sessions.clone(), config.relay.clone());
        Self {
            config,
            start_time: Instant::now(),
            sessions,
            relay,
        }
    }
}
