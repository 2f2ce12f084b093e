//! Shell process management.
//!
//! This module provides two modes of shell interaction:
//!
//! - **One-shot** ([`process::exec_command`]) — run a command, capture output,
//!   return. Used by `POST /api/system/exec`.
//! - **Interactive** ([`ProcessBackend`]) — spawn a long-lived shell on a
//!   pseudo-terminal. Used by every session.
//!
//! The interactive side is deliberately narrow: a backend spawns a process and
//! hands back a [`ProcessHandle`] (write, resize, kill) plus a channel of
//! [`ProcessEvent`]s. Output arrives as `Data` chunks in the order the process
//! produced them, followed by exactly one `Exited`. The session layer never
//! touches file descriptors or signals directly, so a platform without POSIX
//! PTYs only needs another backend implementation.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::BackendError;

pub mod process;
pub mod pty;

#[cfg(test)]
pub mod scripted;

pub use pty::PtyBackend;

/// Parameters for spawning one interactive process.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    /// Merged into (not replacing) the inherited environment.
    pub env: HashMap<String, String>,
}

/// Something a spawned process reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of terminal output. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// The process terminated. Always the last event; `-1` when the code is
    /// unavailable (e.g. killed by a signal).
    Exited(i32),
}

/// Control side of a spawned process.
pub trait ProcessHandle: Send + Sync {
    /// OS process id, when the backend has one.
    fn pid(&self) -> Option<u32>;

    /// Queue raw bytes for the process's input.
    fn write(&self, data: Bytes) -> Result<(), BackendError>;

    /// Change the terminal window size. Safe to call while output flows.
    fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError>;

    /// Request forcible termination. Idempotent.
    fn kill(&self);
}

/// A freshly spawned process: its control handle and its event stream.
pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub events: mpsc::Receiver<ProcessEvent>,
}

/// Creates interactive processes. One implementation per platform.
pub trait ProcessBackend: Send + Sync + 'static {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess, BackendError>;
}
