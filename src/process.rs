#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    time::timeout,
};

/// Kills a spawned tool if the future driving it is dropped, e.g. when a
/// deadline elapses or the batch is interrupted mid-extraction.
struct ChildDropGuard(Option<Child>);

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        Self(Some(child))
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> Result<&mut Child> {
        self.0
            .as_mut()
            .context("child process already taken from guard")
    }

    /// Prevents the guard from killing the process on drop.
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        if let Some(child) = self.0.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Captured result of a finished tool.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

impl Collected {
    /// Whether the tool exited with status zero.
    pub fn succeeded(&self) -> bool {
        self.status.success()
    }

    /// Stderr as text, trimmed, for error messages.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs a tool with stdin closed and collects stdout/stderr, killing it if
/// `deadline` elapses first.
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    cwd: Option<&Path>,
    deadline: Option<Duration>,
) -> Result<Collected> {
    let program = program.as_ref();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut guard = ChildDropGuard::new(
        cmd.spawn()
            .with_context(|| format!("failed to spawn {}", program.to_string_lossy()))?,
    );

    let mut stdout = guard
        .child_mut()?
        .stdout
        .take()
        .context("missing stdout pipe")?;
    let mut stderr = guard
        .child_mut()?
        .stderr
        .take()
        .context("missing stderr pipe")?;

    let out_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout
            .read_to_end(&mut buf)
            .await
            .context("failed to read stdout")?;
        Ok::<Vec<u8>, anyhow::Error>(buf)
    });
    let err_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr
            .read_to_end(&mut buf)
            .await
            .context("failed to read stderr")?;
        Ok::<Vec<u8>, anyhow::Error>(buf)
    });

    let wait_future = async move {
        let mut guard = guard;
        let status = guard
            .child_mut()?
            .wait()
            .await
            .context("failed to wait on process")?;
        let stdout = out_task.await.context("stdout task join error")??;
        let stderr = err_task.await.context("stderr task join error")??;
        guard.disarm();
        Ok(Collected {
            status,
            stdout,
            stderr,
        })
    };

    match deadline {
        Some(limit) => timeout(limit, wait_future)
            .await
            .with_context(|| format!("{} timed out", program.to_string_lossy()))?,
        None => wait_future.await,
    }
}

/// Launches an interactive program (a document viewer) with its output
/// discarded and waits until the user closes it.
pub async fn run_until_exit(program: impl AsRef<OsStr>, args: &[OsString]) -> Result<ExitStatus> {
    let program = program.as_ref();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch {}", program.to_string_lossy()))?;

    let mut guard = ChildDropGuard::new(child);
    let status = guard
        .child_mut()?
        .wait()
        .await
        .context("failed to wait on viewer")?;
    guard.disarm();
    Ok(status)
}
