//! Engine subprocess supervision.
//!
//! [`EngineProcess::start`] launches the engine with piped stdio and hands
//! stdin/stdout back to the caller. A supervisor task owns the child from
//! then on: it waits for the exit, handles stop requests, and publishes a
//! single exit notice. A second task forwards the engine's stderr to
//! `tracing` line by line.
//!
//! Stopping relies on the engine exiting once its stdin is closed. If it is
//! still running after the grace period it is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use crate::error::{Result, SasswireError};

/// Executable looked up on `PATH` when none is configured.
pub const DEFAULT_EXECUTABLE: &str = if cfg!(windows) {
    "dart-sass-embedded.bat"
} else {
    "dart-sass-embedded"
};

/// Time the engine gets to exit on its own after a stop request.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// A running (or exited) engine process.
///
/// Dropping it counts as a stop request.
pub struct EngineProcess {
    path: PathBuf,
    pid: Option<u32>,
    exit: ExitNotice,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl EngineProcess {
    /// Spawn the engine and return it with its stdin and stdout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        path: &Path,
        args: &[String],
        stop_grace: Duration,
    ) -> Result<(Self, ChildStdin, ChildStdout)> {
        let spawn_failed = |source| SasswireError::SpawnFailed {
            path: path.to_path_buf(),
            source,
        };

        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;

        let missing = |stream: &str| {
            spawn_failed(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} was not captured", stream),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take();

        let pid = child.id();
        tracing::debug!(?pid, "Started engine {}", path.display());

        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, pid));
        }

        let (exit_tx, exit_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(supervise(child, pid, stop_rx, stop_grace, exit_tx));

        let process = Self {
            path: path.to_path_buf(),
            pid,
            exit: ExitNotice { rx: exit_rx },
            stop_tx: Mutex::new(Some(stop_tx)),
        };
        Ok((process, stdin, stdout))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// OS process id, if the process had not already exited at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        !self.exit.has_exited()
    }

    /// A handle that resolves once the engine has terminated.
    pub fn exit_notice(&self) -> ExitNotice {
        self.exit.clone()
    }

    /// Ask the engine to stop. Only the first call has an effect.
    pub fn stop(&self) {
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for EngineProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProcess")
            .field("path", &self.path)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Resolves once the engine process has terminated, for whatever reason.
#[derive(Debug, Clone)]
pub struct ExitNotice {
    rx: watch::Receiver<bool>,
}

impl ExitNotice {
    /// Wait for the exit. Returns immediately if it already happened.
    pub async fn wait(&mut self) {
        loop {
            let exited = *self.rx.borrow_and_update();
            if exited {
                return;
            }
            // A dropped sender means the supervisor is gone, which is an exit too.
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn has_exited(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    exit_tx: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut stop_rx => {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(?pid, "Engine still running after {:?}, killing it", grace);
                    if let Err(e) = child.start_kill() {
                        tracing::error!(?pid, "Failed to kill engine: {}", e);
                    }
                    child.wait().await
                }
            }
        }
    };

    match status {
        Ok(status) if status.success() => tracing::debug!(?pid, "Engine exited"),
        Ok(status) => tracing::warn!(?pid, "Engine exited with {}", status),
        Err(e) => tracing::error!(?pid, "Failed to wait for engine: {}", e),
    }
    let _ = exit_tx.send(true);
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::warn!(target: "sasswire::engine", ?pid, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(?pid, "Stopped reading engine stderr: {}", e);
                break;
            }
        }
    }
}
