//! One-shot command execution.
//!
//! [`exec_command`] runs `<shell> -c "<command>"`, captures stdout and stderr,
//! and returns them together with the exit code. It is the opaque "run this
//! string" facility behind `POST /api/system/exec`; there is no retry policy.
//! `kill_on_drop(true)` makes sure a cancelled or timed-out command does not
//! outlive its request.

use std::fmt::Write;
use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Max output size per stream for [`exec_command`] (1 MB).
///
/// Output beyond this limit is still drained from the pipe (to prevent
/// deadlocks) but discarded. A truncation notice is appended to the returned
/// string.
const MAX_EXEC_OUTPUT: usize = 1024 * 1024;

/// Result of a completed command (whatever its exit code).
#[derive(Debug, Serialize)]
pub struct ExecResult {
    /// Process exit code, or `-1` if the code was unavailable (e.g. killed by signal).
    pub exit_code: i32,
    /// Captured stdout (capped at [`MAX_EXEC_OUTPUT`], lossy UTF-8 conversion).
    pub stdout: String,
    /// Captured stderr (capped at [`MAX_EXEC_OUTPUT`], lossy UTF-8 conversion).
    pub stderr: String,
    /// Wall-clock duration of the command in milliseconds.
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// The shell binary could not be started (e.g. not found, permission denied).
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),
    /// The child process started but `wait()` failed.
    #[error("process error: {0}")]
    ProcessFailed(String),
    /// The command exceeded its timeout and was killed.
    #[error("command timed out")]
    Timeout,
}

/// Execute `command` through `shell -c` in `working_dir`.
///
/// Stdout and stderr are read concurrently (to avoid pipe deadlock) and each
/// capped at [`MAX_EXEC_OUTPUT`] bytes. The entire operation is bounded by
/// `timeout_ms`.
pub async fn exec_command(
    shell: &str,
    working_dir: &Path,
    command: &str,
    timeout_ms: u64,
) -> Result<ExecResult, ExecError> {
    let start = std::time::Instant::now();

    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stdout pipe".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stderr pipe".to_string()))?;

    let timeout = tokio::time::Duration::from_millis(timeout_ms);
    let run = async {
        let (stdout_data, stderr_data) = tokio::join!(
            read_capped(&mut stdout, MAX_EXEC_OUTPUT),
            read_capped(&mut stderr, MAX_EXEC_OUTPUT),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::ProcessFailed(e.to_string()))?;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok::<_, ExecError>(ExecResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_data,
            stderr: stderr_data,
            duration_ms,
        })
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout),
    }
}

/// Read from an async reader, keeping the first `max_bytes` and discarding the
/// rest.
///
/// Keeps reading past the cap instead of closing the pipe early: closing a
/// pipe while the child is still writing raises SIGPIPE in the child.
async fn read_capped(reader: &mut (impl tokio::io::AsyncRead + Unpin), max_bytes: usize) -> String {
    let mut buf = Vec::with_capacity(max_bytes.min(65536));
    let mut tmp = [0u8; 8192];
    let mut total_read = 0usize;
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total_read += n;
                if buf.len() < max_bytes {
                    let take = n.min(max_bytes - buf.len());
                    buf.extend_from_slice(&tmp[..take]);
                }
            }
        }
    }
    let mut s = String::from_utf8_lossy(&buf).into_owned();
    if total_read > max_bytes {
        let _ = write!(
            s,
            "\n[truncated: {total_read} bytes total, showing first {max_bytes}]"
        );
    }
    s
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_both_streams() {
        let result = exec_command("/bin/sh", Path::new("/"), "echo out; echo err >&2; exit 3", 5000)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let err = exec_command("/bin/sh", Path::new("/"), "sleep 5", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout));
    }

    #[tokio::test]
    async fn test_exec_missing_shell() {
        let err = exec_command("/nonexistent/shell", Path::new("/"), "true", 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_read_capped_truncates() {
        let data = vec![b'x'; 100];
        let mut reader = &data[..];
        let s = read_capped(&mut reader, 10).await;
        assert!(s.starts_with("xxxxxxxxxx\n[truncated: 100 bytes total"));
    }
}
