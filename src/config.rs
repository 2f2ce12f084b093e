//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `SHELLMUX_LISTEN`, `SHELLMUX_SHELL`,
//!    `SHELLMUX_WORKSPACE`
//! 2. **Config file** — path via `--config <path>`, or `shellmux.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:3000"
//! max_sessions = 32
//! history_bytes = 102400        # 100 KiB replay buffer per session
//! subscriber_backlog = 1024     # chunks a slow viewer may lag before being dropped
//! default_terminal_cols = 80
//! default_terminal_rows = 24
//! exec_timeout_ms = 30000
//!
//! [shell]
//! program = "/bin/bash"
//! args = ["-l"]
//! term = "xterm-256color"
//! workspace_root = "~/shellmux-workspace"
//!
//! [shell.env]
//! BROWSER = "wslview"
//!
//! [relay]
//! forward_tag = "<agent2>"
//! reply_tag = "<agent1>"
//! min_interval_ms = 1000
//! max_line_buffer = 50000
//!
//! [logging]
//! level = "info"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent sessions (default 32).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Bytes of output kept per session for replay on attach (default 100 KiB).
    #[serde(default = "default_history_bytes")]
    pub history_bytes: usize,
    /// Output chunks a subscriber may fall behind before it is disconnected.
    #[serde(default = "default_subscriber_backlog")]
    pub subscriber_backlog: usize,
    #[serde(default = "default_terminal_cols")]
    pub default_terminal_cols: u16,
    #[serde(default = "default_terminal_rows")]
    pub default_terminal_rows: u16,
    /// Timeout for `POST /api/system/exec` in milliseconds (default 30 000).
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
}

/// How session shells are launched.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary for sessions and one-shot exec (default `/bin/bash`).
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments passed to interactive session shells (default `["-l"]`).
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// `TERM` value exported to sessions.
    #[serde(default = "default_term")]
    pub term: String,
    /// Directory under which per-project working directories are created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    /// Extra environment merged into every session.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Auto-pilot relay tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Tag the first session of a pair uses to address the second.
    #[serde(default = "default_forward_tag")]
    pub forward_tag: String,
    /// Tag the second session uses to address the first.
    #[serde(default = "default_reply_tag")]
    pub reply_tag: String,
    /// Minimum milliseconds between two forwards in one direction.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Unterminated line bytes kept before the accumulator is reset.
    #[serde(default = "default_max_line_buffer")]
    pub max_line_buffer: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_max_sessions() -> usize {
    32
}
fn default_history_bytes() -> usize {
    100 * 1024
}
fn default_subscriber_backlog() -> usize {
    1024
}
fn default_terminal_cols() -> u16 {
    80
}
fn default_terminal_rows() -> u16 {
    24
}
fn default_exec_timeout_ms() -> u64 {
    30000
}
fn default_program() -> String {
    "/bin/bash".to_string()
}
fn default_args() -> Vec<String> {
    vec!["-l".to_string()]
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_workspace_root() -> String {
    "~/shellmux-workspace".to_string()
}
fn default_forward_tag() -> String {
    "<agent2>".to_string()
}
fn default_reply_tag() -> String {
    "<agent1>".to_string()
}
fn default_min_interval_ms() -> u64 {
    1000
}
fn default_max_line_buffer() -> usize {
    50_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: default_max_sessions(),
            history_bytes: default_history_bytes(),
            subscriber_backlog: default_subscriber_backlog(),
            default_terminal_cols: default_terminal_cols(),
            default_terminal_rows: default_terminal_rows(),
            exec_timeout_ms: default_exec_timeout_ms(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            term: default_term(),
            workspace_root: default_workspace_root(),
            env: HashMap::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            forward_tag: default_forward_tag(),
            reply_tag: default_reply_tag(),
            min_interval_ms: default_min_interval_ms(),
            max_line_buffer: default_max_line_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `shellmux.toml` in
    /// the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new("shellmux.toml").exists() => Self::from_file("shellmux.toml")?,
            None => Config::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Parse a TOML document; missing sections and fields take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("SHELLMUX_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(shell) = lookup("SHELLMUX_SHELL") {
            self.shell.program = shell;
        }
        if let Some(root) = lookup("SHELLMUX_WORKSPACE") {
            self.shell.workspace_root = root;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.history_bytes, 102_400);
        assert_eq!(config.server.default_terminal_cols, 80);
        assert_eq!(config.server.default_terminal_rows, 24);
        assert_eq!(config.relay.min_interval_ms, 1000);
        assert_eq!(config.relay.forward_tag, "<agent2>");
        assert_eq!(config.relay.reply_tag, "<agent1>");
        assert_eq!(config.shell.args, vec!["-l".to_string()]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            max_sessions = 4

            [shell]
            program = "/bin/sh"
            args = []

            [shell.env]
            FOO = "bar"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.max_sessions, 4);
        assert_eq!(config.server.listen, "127.0.0.1:3000");
        assert_eq!(config.shell.program, "/bin/sh");
        assert!(config.shell.args.is_empty());
        assert_eq!(config.shell.env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(config.relay.max_line_buffer, 50_000);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "SHELLMUX_LISTEN" => Some("0.0.0.0:9000".to_string()),
            "SHELLMUX_WORKSPACE" => Some("/srv/work".to_string()),
            _ => None,
        });
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.shell.workspace_root, "/srv/work");
        assert_eq!(config.shell.program, "/bin/bash");
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(Config::from_toml("[server\nlisten = ").is_err());
    }
}
