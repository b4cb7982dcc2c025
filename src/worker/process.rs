//! Worker process launcher and background monitors.
//!
//! [`launch`] starts the configured executable with:
//! - no arguments and `current_dir` set to the configured working directory,
//! - all three standard streams piped,
//! - `kill_on_drop(true)` so an abandoned child never outlives its session.
//!
//! Three tasks are attached to every launched process, all reporting into
//! the session's [`WorkerEvent`] channel and tagged with the process
//! generation:
//! - the stdout reader ([`run_reader`](super::reader::run_reader)),
//! - a stderr pump that forwards every chunk written to the error stream,
//! - an exit monitor that reports the exit status once stdout has drained.
//!
//! Cancelling the per-process token (or dropping the [`WorkerProcess`])
//! kills the child and stops all three tasks.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::framer::ObjectFramer;
use super::reader::run_reader;
use super::{WorkerEvent, ECHO_TARGET};
use crate::config::SessionConfig;
use crate::{AppError, Result};

/// How long the exit monitor waits for stdout to drain before reporting.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Read size for the stderr pump.
const STDERR_CHUNK: usize = 4096;

/// Identity of a launched worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerHandle {
    /// Launch sequence number within the owning session, starting at 1.
    pub generation: u64,
    /// OS process id, when the platform reported one.
    pub pid: Option<u32>,
}

/// A running worker: its stdin plus the token controlling its monitors.
#[derive(Debug)]
pub struct WorkerProcess {
    handle: WorkerHandle,
    stdin: ChildStdin,
    cancel: CancellationToken,
}

impl WorkerProcess {
    /// Identity of this process.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        self.handle
    }

    /// Launch generation of this process.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.handle.generation
    }

    /// Write one encoded line to the worker's stdin and flush it.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, typically `BrokenPipe` once the
    /// worker has exited.
    pub async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(line).await?;
        self.stdin.flush().await
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Launch the worker described by `config` as process `generation`.
///
/// The returned process is not yet known to be ready; the caller performs
/// the readiness handshake by waiting for the first object on `events`.
///
/// # Errors
///
/// - `AppError::Spawn("failed to launch …")` — the OS refused to start the
///   executable (missing file, permissions, bad working directory).
/// - `AppError::Spawn("failed to capture worker …")` — a piped stream was
///   not available.
pub fn launch(
    config: &SessionConfig,
    generation: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
    parent: &CancellationToken,
) -> Result<WorkerProcess> {
    let program = config.program();
    let working_directory = config.working_directory();

    let mut child = Command::new(&program)
        .current_dir(&working_directory)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::Spawn(format!(
                "failed to launch {} in {}: {err}",
                program.display(),
                working_directory.display()
            ))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stderr".into()))?;

    let handle = WorkerHandle {
        generation,
        pid: child.id(),
    };
    let cancel = parent.child_token();

    let reader = tokio::spawn(
        run_reader(
            generation,
            stdout,
            ObjectFramer::new(config.frame_limit()),
            config.log,
            events.clone(),
            cancel.clone(),
        )
        .in_current_span(),
    );
    tokio::spawn(
        pump_stderr(generation, stderr, config.log, events.clone(), cancel.clone())
            .in_current_span(),
    );
    tokio::spawn(monitor_exit(generation, child, reader, events, cancel.clone()).in_current_span());

    debug!(
        generation,
        pid = ?handle.pid,
        cwd = %working_directory.display(),
        "worker process launched"
    );

    Ok(WorkerProcess {
        handle,
        stdin,
        cancel,
    })
}

/// Human-readable description of how a process ended.
#[must_use]
pub fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("worker exited with code {code}"),
        (None, Some(signal)) => format!("worker terminated by signal {signal}"),
        (None, None) => "worker exited".to_owned(),
    }
}

/// Forward every stderr chunk as [`WorkerEvent::Stderr`].
async fn pump_stderr(
    generation: u64,
    mut stderr: ChildStderr,
    echo: bool,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0_u8; STDERR_CHUNK];

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            read = stderr.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(buf.get(..n).unwrap_or_default())
                            .into_owned();
                        if echo {
                            info!(
                                target: ECHO_TARGET,
                                generation,
                                stream = "stderr",
                                "{}",
                                text.trim_end()
                            );
                        }
                        if events.send(WorkerEvent::Stderr { generation, text }).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(generation, %err, "stderr pump: read failed, stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Await child exit and emit [`WorkerEvent::Exited`].
///
/// The exit notice is held back until the stdout reader finishes (bounded by
/// [`DRAIN_GRACE`]) so objects written just before exit are delivered first.
/// On cancellation the child is killed and no event is emitted.
async fn monitor_exit(
    generation: u64,
    mut child: Child,
    reader: JoinHandle<()>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) {
    tokio::select! {
        result = child.wait() => {
            let (code, signal) = match result {
                Ok(status) => (status.code(), exit_signal(status)),
                Err(err) => {
                    warn!(generation, %err, "error waiting for worker process");
                    (None, None)
                }
            };

            if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
                debug!(generation, "stdout still open after exit; reporting exit anyway");
            }

            info!(generation, ?code, ?signal, "worker process exited");

            if events.send(WorkerEvent::Exited { generation, code, signal }).is_err() {
                debug!(generation, "event channel closed before exit could be delivered");
            }
        }
        () = cancel.cancelled() => {
            if let Err(err) = child.kill().await {
                warn!(generation, %err, "failed to kill worker process");
            } else {
                debug!(generation, "worker process killed");
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}
