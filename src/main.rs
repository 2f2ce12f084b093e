#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # shellmux
//!
//! Multi-session terminal gateway. Spawns long-lived shells on
//! pseudo-terminals, lets any number of browser clients attach to each one
//! over WebSocket, and can pair two sessions so tagged output lines in one are
//! typed into the other.
//!
//! ## Subcommands
//!
//! - `shellmux serve` (default) — run the HTTP/WS server
//!
//! ## API surface
//!
//! | Method | Path                         | Description                        |
//! |--------|------------------------------|------------------------------------|
//! | GET    | `/healthz`                   | Liveness probe                     |
//! | POST   | `/api/sessions`              | Create a session                   |
//! | GET    | `/api/sessions`              | List sessions                      |
//! | GET    | `/api/sessions/{id}`         | Session status                     |
//! | POST   | `/api/sessions/{id}/input`   | Write raw input                    |
//! | POST   | `/api/sessions/{id}/resize`  | Resize terminal                    |
//! | DELETE | `/api/sessions/{id}`         | Kill session                       |
//! | POST   | `/api/autopilot/link`        | Pair two sessions                  |
//! | POST   | `/api/autopilot/unlink`      | Unpair (optionally kill)           |
//! | GET    | `/api/autopilot/links`       | List active pairings               |
//! | POST   | `/api/system/exec`           | One-shot command execution         |
//! | GET    | `/api/ws?session_id=`        | WebSocket attach                   |

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};

use shellmux::shell::PtyBackend;
use shellmux::{routes, AppState, Config};

/// Multi-session terminal gateway.
#[derive(Parser)]
#[command(name = "shellmux", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to TOML config file (when no subcommand is given).
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("shellmux: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("shellmux v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Shell: {} {:?}", config.shell.program, config.shell.args);
    info!("Workspace: {}", config.shell.workspace_root);
    info!("Listening on {}", config.server.listen);

    let state = AppState::new(Arc::new(config), Arc::new(PtyBackend));
    let app = routes::router(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown. Killing sessions first ends every WebSocket, which
    // the server otherwise waits on forever.
    let sessions = state.sessions.clone();
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
        info!("Shutting down...");
        sessions.kill_all().await;
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {e}");
    }

    state.sessions.kill_all().await;
    info!("Goodbye");
}
