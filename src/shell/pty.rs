//! PTY allocation, shell spawning, and terminal resize.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive for
//! the process lifetime so I/O and resize operations can be performed on it.
//!
//! [`PtyBackend`] runs three background tasks per process:
//!
//! - **stdin writer** — drains an unbounded channel into the master fd
//! - **output reader** — reads the master fd and emits [`ProcessEvent::Data`]
//! - **exit watcher** — waits on the child, lets the reader drain, then emits
//!   [`ProcessEvent::Exited`]

use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::{ProcessBackend, ProcessEvent, ProcessHandle, SpawnRequest, SpawnedProcess};
use crate::error::BackendError;

/// Capacity of the per-process event channel. A full channel pauses the
/// reader, which in turn lets the kernel apply backpressure to the child.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long the exit watcher waits for trailing output after the child exits.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

fn winsize(cols: u16, rows: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Allocate a PTY pair with the given terminal size.
pub fn allocate_pty(cols: u16, rows: u16) -> Result<PtyPair, nix::Error> {
    let OpenptyResult { master, slave } = openpty(&winsize(cols, rows), None)?;
    Ok(PtyPair { master, slave })
}

/// Spawn a program on the slave side of the PTY.
///
/// The child becomes a session leader with the PTY slave as its controlling
/// terminal. stdin/stdout/stderr are all connected to the slave fd.
pub fn spawn_on_pty(pty: &PtyPair, request: &SpawnRequest) -> std::io::Result<Child> {
    let slave_fd = pty.slave.as_raw_fd();
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.working_dir)
        .envs(&request.env)
        .kill_on_drop(true);

    // The child's stdio is handled by pre_exec (dup2 to PTY slave), so tell
    // tokio not to set up pipes.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: All syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Resize a PTY's terminal window.
pub fn resize_pty(master: &OwnedFd, cols: u16, rows: u16) -> Result<(), nix::Error> {
    let ws = winsize(cols, rows);
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that reads a Winsize struct.
    let ret = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, std::ptr::addr_of!(ws)) };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}

/// Wrap an owned duplicate of `fd` as an async file.
fn async_dup(fd: &OwnedFd) -> std::io::Result<tokio::fs::File> {
    let dup = fd.try_clone()?;
    Ok(tokio::fs::File::from_std(std::fs::File::from(dup)))
}

/// POSIX pseudo-terminal backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyBackend;

impl ProcessBackend for PtyBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess, BackendError> {
        let pair = allocate_pty(request.cols, request.rows)
            .map_err(|e| BackendError::Spawn(format!("failed to allocate PTY: {e}")))?;
        let mut child = spawn_on_pty(&pair, request)
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", request.program)))?;
        let pid = child.id();

        // Only the child may hold the slave open, otherwise the reader never
        // sees EOF/EIO after exit.
        let PtyPair { master, slave } = pair;
        drop(slave);

        let master_write = async_dup(&master).map_err(|e| BackendError::Spawn(e.to_string()))?;
        let master_read = async_dup(&master).map_err(|e| BackendError::Spawn(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let exited = Arc::new(AtomicBool::new(false));

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Bytes>();
        let stdin_task = tokio::spawn(async move {
            let mut writer = master_write;
            while let Some(data) = stdin_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let (drained_tx, drained_rx) = oneshot::channel::<()>();
        let out_tx = event_tx.clone();
        tokio::spawn(async move {
            let mut reader = master_read;
            let mut tmp = [0u8; 4096];
            loop {
                match reader.read(&mut tmp).await {
                    // EIO once the slave side is gone
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&tmp[..n]);
                        if out_tx.send(ProcessEvent::Data(chunk)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("PTY {pid:?} output closed");
            let _ = drained_tx.send(());
        });

        let exited_flag = Arc::clone(&exited);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(s) => s.code().unwrap_or(-1),
                Err(e) => {
                    error!("PTY {pid:?} wait error: {e}");
                    -1
                }
            };
            exited_flag.store(true, Ordering::SeqCst);
            info!("PTY {pid:?} exited with code {code}");
            // Background jobs may keep the slave open; don't wait on them forever.
            let _ = tokio::time::timeout(DRAIN_GRACE, drained_rx).await;
            stdin_task.abort();
            let _ = event_tx.send(ProcessEvent::Exited(code)).await;
        });

        let handle = PtyHandle {
            pid,
            master,
            stdin_tx,
            exited,
        };
        Ok(SpawnedProcess {
            handle: Box::new(handle),
            events: event_rx,
        })
    }
}

/// Control handle for one PTY-backed process.
struct PtyHandle {
    pid: Option<u32>,
    /// Kept alive for resize.
    master: OwnedFd,
    stdin_tx: mpsc::UnboundedSender<Bytes>,
    exited: Arc<AtomicBool>,
}

impl ProcessHandle for PtyHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: Bytes) -> Result<(), BackendError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(BackendError::ProcessGone);
        }
        self.stdin_tx
            .send(data)
            .map_err(|_| BackendError::ProcessGone)
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(BackendError::ProcessGone);
        }
        resize_pty(&self.master, cols, rows).map_err(|e| BackendError::Resize(e.to_string()))
    }

    fn kill(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        let Some(pid) = self.pid else { return };
        // The child is a session leader via setsid(), so pgid == pid.
        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            if e != nix::errno::Errno::ESRCH {
                error!("killpg({pid}) failed: {e}");
            }
        }
    }
}
