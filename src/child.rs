//! Subprocess adapter presenting a spawned engine as three piped streams
//! plus an exit channel.
//!
//! Grounded in `sessions::session::ManagedSession::spawn` and
//! `shell::process::spawn_shell_pgroup`, but restructured: the reference
//! session pushes stdout/stderr straight into a shared [`OutputBuffer`],
//! coupling the reader task to session-specific storage. Here the reader
//! tasks instead feed `mpsc` channels exposed as `stdout_reader()` /
//! `stderr_reader()`, so the [`crate::framing`] pipeline can be driven from
//! outside without the adapter knowing anything about framing or
//! classification.

use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// How a child should be asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// SIGTERM to the process group — the child gets a chance to clean up.
    Soft,
    /// SIGKILL to the process group — unblockable.
    Hard,
}

/// How the child's process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with the given status code.
    Exited(i32),
    /// Terminated by a signal; carries the signal number when known.
    Signaled(Option<i32>),
}

/// Error spawning a child process.
#[derive(Debug)]
pub struct SpawnError(pub String);

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to spawn child process: {}", self.0)
    }
}

/// Error writing a line to the child's stdin.
#[derive(Debug)]
pub struct WriteError(pub String);

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stdin write failed: {}", self.0)
    }
}

/// A spawned engine process with piped I/O and process-group signal delivery.
///
/// `stdout_reader()` and `stderr_reader()` each return their channel exactly
/// once; a second call returns `None`.
pub struct ChildProcess {
    pid: u32,
    pgid: u32,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    stdout_rx: Option<mpsc::Receiver<Vec<u8>>>,
    stderr_rx: Option<mpsc::Receiver<Vec<u8>>>,
    exit_rx: Option<oneshot::Receiver<ExitOutcome>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ChildProcess {
    /// Spawn `binary` with `argv` in `working_dir`, as a process group leader
    /// so [`ChildProcess::terminate`] can reach its whole process tree.
    pub fn spawn(binary: &str, argv: &[String], working_dir: &str) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(binary);
        cmd.args(argv)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // SAFETY: setpgid is async-signal-safe per POSIX.
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| SpawnError(e.to_string()))?;
        let pid = child.id().unwrap_or(0);
        let pgid = pid;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpawnError("failed to take stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError("failed to take stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SpawnError("failed to take stderr pipe".to_string()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let stdin_task = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(data) = stdin_rx.recv().await {
                if stdin.write_all(&data).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let (stdout_tx, stdout_rx) = mpsc::channel::<Vec<u8>>(256);
        let stdout_task = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut tmp = [0u8; 4096];
            loop {
                match stdout.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stdout_tx.send(tmp[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let (stderr_tx, stderr_rx) = mpsc::channel::<Vec<u8>>(256);
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut tmp = [0u8; 4096];
            loop {
                match stderr.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stderr_tx.send(tmp[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel::<ExitOutcome>();
        let exit_task = tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => match status.code() {
                    Some(code) => {
                        info!(pid, code, "child exited");
                        ExitOutcome::Exited(code)
                    }
                    None => {
                        #[cfg(unix)]
                        let signal = {
                            use std::os::unix::process::ExitStatusExt;
                            status.signal()
                        };
                        #[cfg(not(unix))]
                        let signal = None;
                        info!(pid, ?signal, "child terminated by signal");
                        ExitOutcome::Signaled(signal)
                    }
                },
                Err(e) => {
                    error!(pid, error = %e, "wait() failed");
                    ExitOutcome::Signaled(None)
                }
            };
            let _ = exit_tx.send(outcome);
        });

        Ok(Self {
            pid,
            pgid,
            stdin_tx,
            stdout_rx: Some(stdout_rx),
            stderr_rx: Some(stderr_rx),
            exit_rx: Some(exit_rx),
            tasks: vec![stdin_task, stdout_task, stderr_task, exit_task],
        })
    }

    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Atomically append `bytes` plus a trailing newline to the child's stdin.
    pub async fn write_line(&self, bytes: &[u8]) -> Result<(), WriteError> {
        let mut line = Vec::with_capacity(bytes.len() + 1);
        line.extend_from_slice(bytes);
        line.push(b'\n');
        self.stdin_tx
            .send(line)
            .await
            .map_err(|_| WriteError("stdin closed".to_string()))
    }

    /// Take ownership of the stdout byte stream. Returns `None` if already taken.
    pub fn stdout_reader(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.stdout_rx.take()
    }

    /// Take ownership of the stderr byte stream. Returns `None` if already taken.
    pub fn stderr_reader(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.stderr_rx.take()
    }

    /// Take ownership of the exit channel. Returns `None` if already taken.
    pub fn exit_channel(&mut self) -> Option<oneshot::Receiver<ExitOutcome>> {
        self.exit_rx.take()
    }

    /// Signal the child's process group. `Soft` sends SIGTERM; `Hard` sends
    /// SIGKILL. The exit channel is guaranteed to resolve afterward since
    /// both signals terminate a process that isn't trapping them, and the
    /// reader tasks observe EOF regardless of which path took it down.
    pub fn terminate(&self, mode: TerminationMode) {
        self.handle().terminate(mode);
    }

    /// A cheap, cloneable handle carrying just enough to terminate this
    /// child's process group from outside the task that owns the full
    /// [`ChildProcess`] — used to register the session with
    /// [`crate::active_sessions::ActiveSessions`] for the shutdown sweep.
    pub fn handle(&self) -> ChildHandle {
        ChildHandle { pgid: self.pgid }
    }

    /// Abort all background I/O tasks. Called once the session is closing to
    /// guarantee resource release on every exit path.
    pub fn abort_tasks(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Detached process-group handle for a spawned child, usable after the
/// owning [`ChildProcess`] has been moved into a session task.
#[derive(Debug, Clone, Copy)]
pub struct ChildHandle {
    pgid: u32,
}

impl ChildHandle {
    #[cfg(test)]
    pub fn for_test(pgid: u32) -> Self {
        Self { pgid }
    }

    pub fn terminate(&self, mode: TerminationMode) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pgid as i32;
        if pgid <= 0 {
            return;
        }
        let signal = match mode {
            TerminationMode::Soft => libc::SIGTERM,
            TerminationMode::Hard => libc::SIGKILL,
        };
        unsafe {
            libc::kill(-pgid, signal);
        }
    }
}
