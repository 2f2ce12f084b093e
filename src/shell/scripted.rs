//! In-memory [`ProcessBackend`] for tests.
//!
//! Every spawned process is driven by a [`ScriptedProcess`] the test can grab
//! from the backend: push output, make it exit, and inspect what was written
//! to its input. With `echo` enabled, input is reflected back as output the way
//! a terminal in cooked mode would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{ProcessBackend, ProcessEvent, ProcessHandle, SpawnRequest, SpawnedProcess};
use crate::error::BackendError;

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    echo: bool,
    fail: bool,
    spawned: Arc<Mutex<Vec<ScriptedProcess>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose processes echo their input as output.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Backend whose every spawn fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// The `n`th process spawned by this backend.
    pub fn process(&self, n: usize) -> ScriptedProcess {
        self.spawned.lock().unwrap()[n].clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

/// Test-side controller for one scripted process.
#[derive(Clone)]
pub struct ScriptedProcess {
    pub request: SpawnRequest,
    events: mpsc::UnboundedSender<ProcessEvent>,
    input: Arc<Mutex<Vec<u8>>>,
    size: Arc<Mutex<(u16, u16)>>,
    exited: Arc<AtomicBool>,
    echo: bool,
}

impl ScriptedProcess {
    pub fn emit(&self, data: impl Into<Bytes>) {
        let _ = self.events.send(ProcessEvent::Data(data.into()));
    }

    pub fn exit(&self, code: i32) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ProcessEvent::Exited(code));
        }
    }

    /// Everything written to the process so far, lossily decoded.
    pub fn input(&self) -> String {
        String::from_utf8_lossy(&self.input.lock().unwrap()).into_owned()
    }

    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }
}

impl ProcessHandle for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn write(&self, data: Bytes) -> Result<(), BackendError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(BackendError::ProcessGone);
        }
        self.input.lock().unwrap().extend_from_slice(&data);
        if self.echo {
            self.emit(data);
        }
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError> {
        if cols == 0 || rows == 0 {
            return Err(BackendError::Resize("zero-sized window".into()));
        }
        *self.size.lock().unwrap() = (cols, rows);
        Ok(())
    }

    fn kill(&self) {
        self.exit(137);
    }
}

impl ProcessBackend for ScriptedBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess, BackendError> {
        if self.fail {
            return Err(BackendError::Spawn("scripted spawn failure".into()));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);
        // Unbounded on the test side so emit() never blocks a sync test body.
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if event_tx.send(ev).await.is_err() {
                    break;
                }
            }
        });
        let process = ScriptedProcess {
            request: request.clone(),
            events: tx,
            input: Arc::default(),
            size: Arc::new(Mutex::new((request.cols, request.rows))),
            exited: Arc::default(),
            echo: self.echo,
        };
        self.spawned.lock().unwrap().push(process.clone());
        Ok(SpawnedProcess {
            handle: Box::new(process),
            events: event_rx,
        })
    }
}
