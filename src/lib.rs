#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! shellmux library — a multi-session PTY gateway.
//!
//! - `shell` — process backends (PTY) and one-shot command execution
//! - `sessions` — session registry, history buffer, attachments
//! - `relay` — auto-pilot command forwarding between paired sessions
//! - `ws` — WebSocket transport
//! - `routes` — REST API route handlers and the router
//! - `config` — configuration loading
//! - `error` — error taxonomy and HTTP mapping

pub mod config;
pub mod error;
pub mod relay;
pub mod routes;
pub mod sessions;
pub mod shell;
pub mod state;
pub mod util;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use relay::RelayRouter;
pub use sessions::SessionManager;
pub use state::AppState;
