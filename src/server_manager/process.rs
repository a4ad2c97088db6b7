//! Child process handling for process backends.
//!
//! Spawns the configured command, exposes liveness and exit status, and
//! captures stderr for diagnostics when a server dies during startup.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::errors::ManagerError;
use super::types::ProcessConfig;

/// Longest stderr excerpt kept in an error message.
const STDERR_CAPTURE_LIMIT: usize = 2000;

/// How long to wait for stderr of an exited process.
const STDERR_READ_TIMEOUT: Duration = Duration::from_millis(500);

// ─── ChildProcess ────────────────────────────────────────────────────────────

/// Pipes taken from a freshly spawned child. `stdin`/`stdout` are only
/// present when the server speaks JSON-RPC over stdio.
pub struct ChildStdio {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// A spawned server process. Killed on drop.
pub struct ChildProcess {
    server_name: String,
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl ChildProcess {
    /// Spawn `config.command` with its args, env and working directory.
    pub fn spawn(server_name: &str, config: &ProcessConfig) -> Result<(Self, ChildStdio), ManagerError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        if config.endpoint.is_some() {
            cmd.stdin(std::process::Stdio::null());
            cmd.stdout(std::process::Stdio::null());
        } else {
            cmd.stdin(std::process::Stdio::piped());
            cmd.stdout(std::process::Stdio::piped());
        }
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ManagerError::SpawnFailed {
            name: server_name.to_string(),
            reason: format!("{}: {e}", config.command),
        })?;

        let stdio = ChildStdio {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };
        let pid = child.id();

        tracing::info!(server = server_name, pid = ?pid, command = %config.command, "spawned server process");

        Ok((
            Self {
                server_name: server_name.to_string(),
                pid,
                child: Mutex::new(child),
            },
            stdio,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check if the process is still running.
    pub async fn is_running(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Exit code once the process has exited. `None` while running or when
    /// killed by a signal.
    pub async fn exit_code(&self) -> Option<i32> {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        }
    }

    /// Wait up to `timeout` for the process to exit. Returns whether it did.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut child = self.child.lock().await;
        matches!(tokio::time::timeout(timeout, child.wait()).await, Ok(Ok(_)))
    }

    /// Give the process `grace` to exit on its own, then kill it.
    pub async fn terminate(&self, grace: Duration) {
        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        if !grace.is_zero()
            && matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)))
        {
            tracing::debug!(server = %self.server_name, "server process exited");
            return;
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(server = %self.server_name, error = %e, "failed to kill server process");
        } else {
            tracing::debug!(server = %self.server_name, pid = ?self.pid, "killed server process");
        }
    }
}

// ─── Stderr ──────────────────────────────────────────────────────────────────

/// Read what an exited process wrote to stderr, truncated for logging.
pub async fn read_stderr_on_failure(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(STDERR_READ_TIMEOUT, stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CAPTURE_LIMIT {
                let mut cut = STDERR_CAPTURE_LIMIT;
                while !buf.is_char_boundary(cut) {
                    cut -= 1;
                }
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub fn format_stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {trimmed}")
    }
}

/// Forward a running server's stderr to the debug log until it closes.
pub fn drain_stderr(server_name: &str, stderr: Option<ChildStderr>) {
    let Some(stderr) = stderr else {
        return;
    };
    let server = server_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, line = %line, "server stderr");
        }
    });
}

// ─── Tests ───────────────────────────────────────────────────────────────────
