//! One live session: a process handle plus its output bookkeeping.
//!
//! A [`Session`] owns exactly one [`ProcessHandle`]. Output produced by the
//! process is appended to a bounded [`HistoryBuffer`] and broadcast to every
//! subscriber, both under the same lock. That lock is what makes attach atomic:
//! [`Session::attach`] takes the history snapshot and registers the live
//! receiver while holding it, so a viewer can neither miss nor duplicate a
//! chunk that races with its attach.
//!
//! ## Lifecycle
//!
//! `Creating → Running → Exited`. The transition to `Exited` happens once, in
//! [`Session::mark_exited`]; whichever path gets there first (spontaneous exit
//! or kill) owns teardown. [`Session::close`] then drops the broadcast sender,
//! which ends every attachment and relay listener after they drain.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::history::HistoryBuffer;
use crate::error::BackendError;
use crate::shell::ProcessHandle;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Creating,
    Running,
    Exited,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Exited => "exited",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Creating,
            1 => Self::Running,
            _ => Self::Exited,
        }
    }
}

/// Output side of a session. Only ever touched under [`Session::output`].
struct OutputState {
    history: HistoryBuffer,
    /// `None` once the session has closed.
    tx: Option<broadcast::Sender<Bytes>>,
}

pub struct Session {
    pub id: String,
    /// Optional project label, fixed at creation.
    pub project: Option<String>,
    pub working_dir: PathBuf,
    /// Epoch milliseconds when the session was created.
    pub created_at: u64,
    process: Box<dyn ProcessHandle>,
    state: AtomicU8,
    /// `(cols, rows)` as last applied to the terminal.
    dims: StdMutex<(u16, u16)>,
    output: Mutex<OutputState>,
    exit_code: OnceLock<i32>,
    attachments: AtomicUsize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        id: String,
        project: Option<String>,
        working_dir: PathBuf,
        process: Box<dyn ProcessHandle>,
        dims: (u16, u16),
        history_bytes: usize,
        backlog: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(backlog.max(1));
        Self {
            id,
            project,
            working_dir,
            created_at: crate::util::now_ms(),
            process,
            state: AtomicU8::new(SessionState::Creating as u8),
            dims: StdMutex::new(dims),
            output: Mutex::new(OutputState {
                history: HistoryBuffer::new(history_bytes),
                tx: Some(tx),
            }),
            exit_code: OnceLock::new(),
            attachments: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Creating → Running`. No-op in any other state.
    pub fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Creating as u8,
            SessionState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Move to `Exited`. Returns `true` only for the caller that made the
    /// transition.
    pub fn mark_exited(&self) -> bool {
        self.state.swap(SessionState::Exited as u8, Ordering::SeqCst) != SessionState::Exited as u8
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn dimensions(&self) -> (u16, u16) {
        *self.dims.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.load(Ordering::SeqCst)
    }

    /// Forward raw bytes to the process input.
    pub fn write(&self, data: Bytes) -> Result<(), BackendError> {
        self.process.write(data)
    }

    /// Resize the terminal and record the new size on success.
    ///
    /// Concurrent callers are applied one at a time; the last one wins.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError> {
        let mut dims = self
            .dims
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.process.resize(cols, rows)?;
        *dims = (cols, rows);
        Ok(())
    }

    pub fn kill(&self) {
        self.process.kill();
    }

    /// Record a chunk in history and fan it out to all current subscribers.
    ///
    /// Process output and injected notices both go through here, so every
    /// subscriber observes one total order.
    pub async fn publish(&self, chunk: Bytes) {
        let mut guard = self.output.lock().await;
        let out = &mut *guard;
        let Some(tx) = &out.tx else { return };
        out.history.append(&chunk);
        // Err only means nobody is listening right now.
        let _ = tx.send(chunk);
    }

    /// Snapshot history and subscribe to live output in one step.
    ///
    /// Returns `None` once the session has closed.
    pub async fn attach(self: &Arc<Self>) -> Option<Attachment> {
        let out = self.output.lock().await;
        let tx = out.tx.as_ref()?;
        let output = tx.subscribe();
        let history = out.history.snapshot();
        drop(out);
        let n = self.attachments.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Session {} attached (attachments: {n})", self.id);
        Some(Attachment {
            session: Arc::clone(self),
            history,
            output,
        })
    }

    /// Live output only, no history. Used by relay listeners.
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<Bytes>> {
        self.output.lock().await.tx.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Bytes currently held in history.
    pub async fn history(&self) -> Bytes {
        self.output.lock().await.history.snapshot()
    }

    /// Record the exit code and end the output stream. Subscribers still
    /// receive everything published before this call.
    pub async fn close(&self, exit_code: Option<i32>) {
        if let Some(code) = exit_code {
            let _ = self.exit_code.set(code);
        }
        self.output.lock().await.tx = None;
    }
}

/// A viewer's binding to one session.
///
/// Dropping it deregisters the live subscription; the session and every other
/// attachment are unaffected.
pub struct Attachment {
    session: Arc<Session>,
    history: Bytes,
    output: broadcast::Receiver<Bytes>,
}

impl Attachment {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// The history snapshot taken at attach time. Empty after the first call.
    pub fn take_history(&mut self) -> Bytes {
        std::mem::take(&mut self.history)
    }

    /// Next live chunk. `Closed` means the session ended; `Lagged` means this
    /// viewer fell further behind than the session backlog allows.
    pub async fn recv(&mut self) -> Result<Bytes, broadcast::error::RecvError> {
        self.output.recv().await
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let n = self.session.attachments.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Session {} detached (attachments: {n})", self.session.id);
    }
}
