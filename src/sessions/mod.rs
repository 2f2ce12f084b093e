//! Session lifecycle management.
//!
//! [`SessionManager`] is the single authority for creating, accessing, and
//! destroying shell sessions. It enforces the `max_sessions` limit, owns the
//! id → [`Session`] mapping, and is the only component that asks the
//! [`ProcessBackend`] for a process or tells one to die.
//!
//! ## Teardown
//!
//! Every session gets one pump task that moves process events into the
//! session's history and broadcast. When the process exits (on its own or
//! because [`SessionManager::destroy`] killed it) the pump runs
//! [`SessionManager::finish`], which removes the entry, closes the output
//! stream and publishes [`SessionEvent::Destroyed`]. `destroy` itself never
//! removes anything, so an explicit kill racing a spontaneous exit still tears
//! down exactly once.
//!
//! ## Concurrency
//!
//! The session map is behind an `RwLock`. Lookups take a read lock; create and
//! removal take a write lock. `create` holds the write lock across the
//! limit-check, id allocation and insert to prevent TOCTOU races.

pub mod history;
pub mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{BackendError, SessionError};
use crate::shell::{ProcessBackend, ProcessEvent, SpawnRequest};
use crate::util::expand_tilde;
pub use session::{Attachment, Session, SessionState};

/// Length of generated session ids.
const SESSION_ID_LEN: usize = 10;

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Registry lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { id: String },
    /// The session is gone from the registry and its output stream is closed.
    Destroyed { id: String, exit_code: Option<i32> },
}

/// Summary of a session returned by [`SessionManager::list`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub project: Option<String>,
    pub cols: u16,
    pub rows: u16,
    /// Epoch milliseconds when the session was created.
    pub created_at: u64,
    pub pid: Option<u32>,
    /// Number of live attachments.
    pub attachments: usize,
    /// `"creating"`, `"running"` or `"exited"`.
    pub status: &'static str,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        let (cols, rows) = s.dimensions();
        Self {
            id: s.id.clone(),
            project: s.project.clone(),
            cols,
            rows,
            created_at: s.created_at,
            pid: s.pid(),
            attachments: s.attachment_count(),
            status: s.state().as_str(),
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Arc<Session>>,
    /// Ids in creation order.
    order: Vec<String>,
}

/// Manages the pool of live sessions.
///
/// Cloneable — all clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<RwLock<Registry>>,
    backend: Arc<dyn ProcessBackend>,
    config: Arc<Config>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, backend: Arc<dyn ProcessBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            backend,
            config,
            events,
        }
    }

    /// Lifecycle notifications for sessions created or destroyed from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create a new session and start its process.
    ///
    /// Returns as soon as the process is spawned; the shell may still be
    /// starting up.
    pub async fn create(
        &self,
        project: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<Session>, SessionError> {
        let project = project.map(str::trim).filter(|p| !p.is_empty());
        let working_dir = self.project_dir(project)?;
        tokio::fs::create_dir_all(&working_dir).await.map_err(|e| {
            SessionError::Spawn(format!(
                "cannot create working directory {}: {e}",
                working_dir.display()
            ))
        })?;

        let mut registry = self.registry.write().await;

        let max = self.config.server.max_sessions;
        if registry.sessions.len() >= max {
            return Err(SessionError::LimitReached(max));
        }

        let id = loop {
            let candidate = new_session_id();
            if !registry.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let shell = &self.config.shell;
        let mut env = shell.env.clone();
        env.insert("TERM".to_string(), shell.term.clone());
        env.insert("SHELLMUX_SESSION_ID".to_string(), id.clone());
        let request = SpawnRequest {
            program: shell.program.clone(),
            args: shell.args.clone(),
            working_dir: working_dir.clone(),
            cols,
            rows,
            env,
        };

        let spawned = self.backend.spawn(&request).map_err(|e| {
            warn!("Session spawn failed ({}): {e}", shell.program);
            SessionError::from_backend(&id, e)
        })?;

        let session = Arc::new(Session::new(
            id.clone(),
            project.map(ToString::to_string),
            working_dir,
            spawned.handle,
            (cols, rows),
            self.config.server.history_bytes,
            self.config.server.subscriber_backlog,
        ));
        registry.sessions.insert(id.clone(), Arc::clone(&session));
        registry.order.push(id.clone());
        let total = registry.sessions.len();
        drop(registry);

        info!(
            "Session {id} created (pid {:?}, {cols}x{rows}, project {:?}), total: {total}",
            session.pid(),
            session.project
        );
        // Created always precedes the matching Destroyed.
        let _ = self.events.send(SessionEvent::Created { id });
        session.mark_running();
        tokio::spawn(self.clone().pump(Arc::clone(&session), spawned.events));
        Ok(session)
    }

    /// Working directory for `project`: a direct child of the workspace root,
    /// or the root itself.
    fn project_dir(&self, project: Option<&str>) -> Result<PathBuf, SessionError> {
        let root = PathBuf::from(expand_tilde(&self.config.shell.workspace_root).as_ref());
        let Some(name) = project else {
            return Ok(root);
        };
        if name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(SessionError::InvalidProject(name.to_string()));
        }
        Ok(root.join(name))
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.registry
            .read()
            .await
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// All live sessions in creation order.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.sessions.get(id))
            .map(|s| SessionInfo::from(s.as_ref()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    /// Forward raw bytes to a session's process.
    ///
    /// A write racing the process exit is dropped and logged, not reported.
    pub async fn send_input(&self, id: &str, data: Bytes) -> Result<(), SessionError> {
        let session = self.get(id).await?;
        match session.write(data) {
            Ok(()) => Ok(()),
            Err(BackendError::ProcessGone) => {
                debug!("Session {id}: input dropped, process already exited");
                Ok(())
            }
            Err(e) => Err(SessionError::from_backend(id, e)),
        }
    }

    /// Resize a session's terminal. On failure the session keeps its previous
    /// dimensions.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let session = self.get(id).await?;
        match session.resize(cols, rows) {
            Ok(()) => {
                debug!("Session {id} resized to {cols}x{rows}");
                Ok(())
            }
            Err(BackendError::ProcessGone) => {
                debug!("Session {id}: resize dropped, process already exited");
                Ok(())
            }
            Err(e) => {
                warn!("Session {id}: resize to {cols}x{rows} failed: {e}");
                Err(SessionError::from_backend(id, e))
            }
        }
    }

    /// Request termination. The session leaves the registry once its process
    /// has actually exited.
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let session = self.get(id).await?;
        info!("Session {id}: kill requested");
        session.kill();
        Ok(())
    }

    /// Attach a viewer: history snapshot plus live subscription.
    pub async fn attach(&self, id: &str) -> Result<Attachment, SessionError> {
        let session = self.get(id).await?;
        session
            .attach()
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Push a synthetic message into a session's output stream. It is
    /// recorded in history and seen by every viewer, but never reaches the
    /// process.
    pub async fn inject_notice(&self, id: &str, text: &str) -> Result<(), SessionError> {
        let session = self.get(id).await?;
        session.publish(Bytes::copy_from_slice(text.as_bytes())).await;
        Ok(())
    }

    async fn pump(self, session: Arc<Session>, mut events: mpsc::Receiver<ProcessEvent>) {
        let mut exit_code = None;
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Data(chunk) => session.publish(chunk).await,
                ProcessEvent::Exited(code) => {
                    exit_code = Some(code);
                    break;
                }
            }
        }
        self.finish(&session, exit_code).await;
    }

    /// `RUNNING → EXITED`: runs once per session, whoever calls it first.
    async fn finish(&self, session: &Arc<Session>, exit_code: Option<i32>) {
        if !session.mark_exited() {
            return;
        }
        let remaining = {
            let mut registry = self.registry.write().await;
            let is_current = registry
                .sessions
                .get(&session.id)
                .is_some_and(|s| Arc::ptr_eq(s, session));
            if is_current {
                registry.sessions.remove(&session.id);
                registry.order.retain(|id| id != &session.id);
            }
            registry.sessions.len()
        };
        session.close(exit_code).await;
        info!(
            "Session {} exited (code {exit_code:?}), remaining: {remaining}",
            session.id
        );
        let _ = self.events.send(SessionEvent::Destroyed {
            id: session.id.clone(),
            exit_code,
        });
    }

    /// Kill every session and wait up to 3 s for them to leave the registry.
    /// Called on server shutdown.
    pub async fn kill_all(&self) {
        let sessions: Vec<Arc<Session>> =
            self.registry.read().await.sessions.values().cloned().collect();
        let count = sessions.len();
        if count == 0 {
            return;
        }
        for s in &sessions {
            s.kill();
            info!("Session {} killed (shutdown)", s.id);
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while self.count().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("Shut down {count} session(s)");
    }
}

fn new_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SESSION_ID_LEN);
    id
}
