//! Auto-pilot: tag-triggered command forwarding between paired sessions.
//!
//! Linking sessions A and B starts two relay tasks. The A→B task watches A's
//! output for lines carrying the forward tag (`<agent2>` by default) and
//! writes the rest of the line into B's input; the B→A task does the same with
//! the reply tag. Each direction keeps its own line buffer and rate limit (see
//! [`direction::RelayDirection`]).
//!
//! A session is the source of at most one link. Relinking a session cancels
//! and awaits its old task before the new one starts, so two tasks never
//! route the same output. Links are dropped automatically when either end is
//! destroyed.
//!
//! Forward failures (target gone, rate-limited) are logged and reported into
//! the source session's own output. Nothing here ever fails an API caller
//! after the link was set up.

pub mod direction;
pub mod filter;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, SessionError};
use crate::sessions::{SessionEvent, SessionManager};
use direction::{RelayAction, RelayDirection};

/// A live link direction as reported by [`RelayRouter::list_links`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub source_id: String,
    pub target_id: String,
    pub tag: String,
}

struct LinkEntry {
    target: String,
    tag: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LinkEntry {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct RouterInner {
    sessions: SessionManager,
    config: RelayConfig,
    /// Keyed by source session id.
    links: Mutex<HashMap<String, LinkEntry>>,
}

/// Owns every relay link. Cloneable — clones share the same link table.
#[derive(Clone)]
pub struct RelayRouter {
    inner: Arc<RouterInner>,
}

impl RelayRouter {
    /// Create the router and start watching session lifecycle events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(sessions: SessionManager, config: RelayConfig) -> Self {
        let events = sessions.subscribe_events();
        let inner = Arc::new(RouterInner {
            sessions,
            config,
            links: Mutex::new(HashMap::new()),
        });
        tokio::spawn(watch_sessions(Arc::downgrade(&inner), events));
        Self { inner }
    }

    /// Pair `first` and `second`: `first` addresses `second` with the forward
    /// tag, `second` answers with the reply tag. Replaces any link either
    /// session was the source of.
    pub async fn link(&self, first: &str, second: &str) -> Result<(), RelayError> {
        if first == second {
            return Err(RelayError::SelfLink(first.to_string()));
        }
        let sessions = &self.inner.sessions;
        let a = sessions.get(first).await?;
        let b = sessions.get(second).await?;

        let forward_tag = self.inner.config.forward_tag.clone();
        let reply_tag = self.inner.config.reply_tag.clone();

        // Held until both directions are in the table. The lifecycle watcher
        // needs this lock too, so a session that closes after subscribe()
        // below is cleaned up once we release it.
        let mut links = self.inner.links.lock().await;
        for id in [first, second] {
            if let Some(old) = links.remove(id) {
                debug!("Relay {id} -> {}: replaced", old.target);
                old.stop().await;
            }
        }
        // Subscribe only after the old directions are gone so no chunk is
        // routed by both.
        let a_output = a
            .subscribe()
            .await
            .ok_or_else(|| SessionError::NotFound(first.to_string()))?;
        let b_output = b
            .subscribe()
            .await
            .ok_or_else(|| SessionError::NotFound(second.to_string()))?;
        links.insert(
            first.to_string(),
            self.start_direction(first, second, &forward_tag, a_output),
        );
        links.insert(
            second.to_string(),
            self.start_direction(second, first, &reply_tag, b_output),
        );
        drop(links);

        // Either session may have exited in the meantime; the watcher
        // cleans up after it.
        let _ = sessions.inject_notice(first, &filter::link_notice(&forward_tag)).await;
        let _ = sessions.inject_notice(second, &filter::link_notice(&reply_tag)).await;

        info!("Relay linked {first} <-> {second}");
        Ok(())
    }

    fn start_direction(
        &self,
        source: &str,
        target: &str,
        tag: &str,
        output: broadcast::Receiver<Bytes>,
    ) -> LinkEntry {
        let config = &self.inner.config;
        let direction = RelayDirection::new(
            tag,
            Duration::from_millis(config.min_interval_ms),
            config.max_line_buffer,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_direction(
            self.inner.sessions.clone(),
            source.to_string(),
            target.to_string(),
            direction,
            output,
            cancel.clone(),
        ));
        LinkEntry {
            target: target.to_string(),
            tag: tag.to_string(),
            cancel,
            task,
        }
    }

    /// Stop both directions of a pair and optionally destroy the sessions.
    /// Returns how many directions were removed.
    pub async fn unlink(&self, first: &str, second: &str, kill: bool) -> usize {
        let mut removed = Vec::new();
        {
            let mut links = self.inner.links.lock().await;
            for id in [first, second] {
                if let Some(entry) = links.remove(id) {
                    removed.push(entry);
                }
            }
        }
        let count = removed.len();
        for entry in removed {
            entry.stop().await;
        }
        info!("Relay unlinked {first} <-> {second} ({count} direction(s))");

        if kill {
            for id in [first, second] {
                if let Err(e) = self.inner.sessions.destroy(id).await {
                    debug!("Relay unlink: {e}");
                }
            }
        }
        count
    }

    /// Active directions, ordered by source id.
    pub async fn list_links(&self) -> Vec<LinkInfo> {
        let links = self.inner.links.lock().await;
        let mut out: Vec<LinkInfo> = links
            .iter()
            .map(|(source, entry)| LinkInfo {
                source_id: source.clone(),
                target_id: entry.target.clone(),
                tag: entry.tag.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        out
    }
}

/// Remove every link touching `id`.
async fn drop_links_for(inner: &RouterInner, id: &str) {
    let removed: Vec<(String, LinkEntry)> = {
        let mut links = inner.links.lock().await;
        let keys: Vec<String> = links
            .iter()
            .filter(|(source, entry)| source.as_str() == id || entry.target == id)
            .map(|(source, _)| source.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| links.remove_entry(&k))
            .collect()
    };
    for (source, entry) in removed {
        info!("Relay {source} -> {} removed (session {id} gone)", entry.target);
        entry.stop().await;
    }
}

/// Drop links whose sessions no longer exist.
async fn prune(inner: &RouterInner) {
    let pairs: Vec<(String, String)> = inner
        .links
        .lock()
        .await
        .iter()
        .map(|(s, e)| (s.clone(), e.target.clone()))
        .collect();
    for (source, target) in pairs {
        for id in [&source, &target] {
            if inner.sessions.get(id).await.is_err() {
                drop_links_for(inner, id).await;
            }
        }
    }
}

async fn watch_sessions(inner: Weak<RouterInner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = events.recv().await;
        let Some(inner) = inner.upgrade() else { break };
        match event {
            Ok(SessionEvent::Destroyed { id, .. }) => drop_links_for(&inner, &id).await,
            Ok(SessionEvent::Created { .. }) => {}
            Err(RecvError::Lagged(n)) => {
                warn!("Relay missed {n} session event(s), re-checking links");
                prune(&inner).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_direction(
    sessions: SessionManager,
    source: String,
    target: String,
    mut direction: RelayDirection,
    mut output: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = output.recv() => r,
        };
        let chunk = match received {
            Ok(chunk) => chunk,
            Err(RecvError::Lagged(n)) => {
                warn!("Relay {source} -> {target}: skipped {n} chunk(s)");
                direction.reset();
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        for action in direction.feed(&chunk, Instant::now()) {
            match action {
                RelayAction::Forward(command) => {
                    info!("Relay {source} -> {target}: {command}");
                    let input = Bytes::from(format!("{command}\r"));
                    match sessions.send_input(&target, input).await {
                        Ok(()) => {
                            let _ = sessions
                                .inject_notice(&source, &filter::forward_ack(&command))
                                .await;
                        }
                        Err(e) => warn!("Relay {source} -> {target}: forward failed: {e}"),
                    }
                }
                RelayAction::RateLimited(command) => {
                    warn!("Relay {source} -> {target}: rate limited, dropped {command:?}");
                    let _ = sessions
                        .inject_notice(&source, &filter::rate_limit_notice(&command))
                        .await;
                }
            }
        }
    }
    debug!("Relay {source} -> {target} stopped");
}
