//! External process execution behind the [`CommandRunner`] trait.
//!
//! Geometry toolkits are driven as opaque subprocesses, never linked. The
//! orchestrator only sees this trait, so tests substitute a recording fake
//! and never spawn anything.
//!
//! ## Output capture
//!
//! stdout and stderr are drained concurrently with the wait (a full pipe
//! would otherwise stall the child forever). Each stream keeps only its last
//! `capture_limit` bytes: tracebacks end at the bottom, and a chatty mesher
//! must not grow memory without bound.
//!
//! ## Timeout
//!
//! On expiry the child is sent SIGKILL and reaped, and the outcome comes back
//! with `timed_out = true`. Reader tasks get a short grace period afterwards;
//! a grandchild that inherited the pipes cannot hold the caller hostage.

use crate::error::BackendError;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long stream readers may outlive the child before being abandoned.
pub const READER_GRACE: Duration = Duration::from_millis(500);

/// Everything needed to run one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Bytes retained per output stream.
    pub capture_limit: usize,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
            timeout: Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS),
            capture_limit: crate::config::DEFAULT_MAX_CAPTURED_OUTPUT,
        }
    }

    /// `program arg1 arg2 …` for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What happened when a command ran to completion or was killed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// `None` when killed by a signal (including our own timeout kill).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs external commands.
///
/// Returns `Ok` for every exit, zero or not, and for timeouts (flagged on the
/// outcome). `Err` is reserved for failures to start the process at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome, BackendError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome, BackendError> {
        let start = Instant::now();
        debug!("Running: {}", invocation.command_line());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(&invocation.program, e))?;

        let stdout_buf = Arc::new(Mutex::new(TailBuffer::new(invocation.capture_limit)));
        let stderr_buf = Arc::new(Mutex::new(TailBuffer::new(invocation.capture_limit)));
        let stdout_task = tokio::spawn(drain(child.stdout.take(), Arc::clone(&stdout_buf)));
        let stderr_task = tokio::spawn(drain(child.stderr.take(), Arc::clone(&stderr_buf)));

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(BackendError::SpawnFailed {
                    command: invocation.program.clone(),
                    detail: format!("failed waiting for process: {e}"),
                });
            }
            Err(_) => {
                warn!(
                    "'{}' exceeded {}ms, killing",
                    invocation.program,
                    invocation.timeout.as_millis()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill '{}': {}", invocation.program, e);
                }
                (None, true)
            }
        };

        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();
        let readers = futures::future::join(stdout_task, stderr_task);
        if tokio::time::timeout(READER_GRACE, readers).await.is_err() {
            debug!(
                "Output streams of '{}' still open after exit; abandoning",
                invocation.program
            );
            stdout_abort.abort();
            stderr_abort.abort();
        }

        let outcome = ExecutionOutcome {
            exit_code,
            stdout: take_text(&stdout_buf),
            stderr: take_text(&stderr_buf),
            duration: start.elapsed(),
            timed_out,
        };
        debug!(
            "'{}' finished: code={:?} timed_out={} in {:?}",
            invocation.program, outcome.exit_code, outcome.timed_out, outcome.duration
        );
        Ok(outcome)
    }
}

fn spawn_error(program: &str, e: io::Error) -> BackendError {
    if e.kind() == io::ErrorKind::NotFound {
        BackendError::CommandNotFound {
            command: program.to_string(),
        }
    } else {
        BackendError::SpawnFailed {
            command: program.to_string(),
            detail: e.to_string(),
        }
    }
}

async fn drain<R>(reader: Option<R>, sink: Arc<Mutex<TailBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut buf) = sink.lock() {
                    buf.push(&chunk[..n]);
                }
            }
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                break;
            }
        }
    }
}

fn take_text(buf: &Arc<Mutex<TailBuffer>>) -> String {
    match buf.lock() {
        Ok(mut b) => std::mem::take(&mut *b).into_string(),
        Err(_) => String::new(),
    }
}

/// Keeps the last `limit` bytes written to it.
#[derive(Debug, Default)]
pub(crate) struct TailBuffer {
    data: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl TailBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        // Compact lazily so steady output doesn't shift the buffer per chunk.
        if self.data.len() > self.limit.saturating_mul(2).max(8192) {
            self.compact();
        }
    }

    fn compact(&mut self) {
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.dropped += excess;
        }
    }

    pub(crate) fn into_string(mut self) -> String {
        self.compact();
        let text = String::from_utf8_lossy(&self.data).into_owned();
        if self.dropped > 0 {
            format!("[… {} earlier bytes truncated]\n{}", self.dropped, text)
        } else {
            text
        }
    }
}
