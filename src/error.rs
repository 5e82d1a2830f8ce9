//! Error types for the cad2stl library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal**: the request cannot produce an STL at all
//!   (no backend configured, every backend failed, workspace could not be
//!   created, unsupported input). Returned as `Err(ConvertError)` from the
//!   top-level `convert*` functions.
//!
//! * [`BackendError`] — **Non-fatal**: one backend attempt failed (tool not
//!   installed, non-zero exit, timeout, no output file) but the next backend
//!   in priority order may still succeed. Collected as [`BackendFailure`]s and
//!   only surfaced inside [`ConvertError::Exhausted`].
//!
//! Callers therefore see exactly three outcomes: an STL, a misconfiguration,
//! or an exhausted list of per-backend causes.

use crate::pipeline::backend::BackendKind;
use crate::request::CadFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the cad2stl library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// No conversion backend has its required setting present.
    #[error(
        "No CAD conversion tool configured. Set {}.",
        .missing.join(" and/or ")
    )]
    NotConfigured { missing: Vec<String> },

    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Conversion errors ─────────────────────────────────────────────────
    /// Every available backend was attempted and none produced an STL.
    #[error("CAD conversion failed: {}", summarize(.failures))]
    Exhausted { failures: Vec<BackendFailure> },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The file extension is not one of the accepted CAD formats.
    #[error(
        "Unsupported file type: '{extension}'\nAccepted: {}",
        CadFormat::EXTENSIONS.join(", ")
    )]
    UnsupportedFormat { extension: String },

    /// A per-request parameter is out of range.
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Input exceeds the configured size limit.
    #[error("Input is {size} bytes, over the {limit}-byte limit")]
    InputTooLarge { size: usize, limit: usize },

    /// Input file could not be read from disk.
    #[error("Failed to read input file '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Workspace errors ──────────────────────────────────────────────────
    /// Temporary directory could not be created or the input staged into it.
    #[error("Conversion workspace error: {context}: {source}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output STL file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::NotConfigured { .. } => "conversion_not_configured",
            ConvertError::InvalidConfig(_) => "invalid_configuration",
            ConvertError::Exhausted { .. } => "conversion_failed",
            ConvertError::UnsupportedFormat { .. } => "unsupported_format",
            ConvertError::InvalidInput(_) => "invalid_input",
            ConvertError::InputTooLarge { .. } => "input_too_large",
            ConvertError::InputReadFailed { .. } => "input_unreadable",
            ConvertError::Workspace { .. } => "workspace_error",
            ConvertError::OutputWriteFailed { .. } => "output_write_failed",
            ConvertError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status an upload endpoint should answer with for this error.
    ///
    /// A missing backend is the service's fault, not the request's, so it
    /// maps to 503 rather than 500.
    pub fn http_status(&self) -> u16 {
        match self {
            ConvertError::NotConfigured { .. } => 503,
            ConvertError::UnsupportedFormat { .. } => 415,
            ConvertError::InputTooLarge { .. } => 413,
            ConvertError::InvalidInput(_) => 400,
            _ => 500,
        }
    }

    /// `true` for the misconfiguration outcome.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConvertError::NotConfigured { .. } | ConvertError::InvalidConfig(_)
        )
    }

    /// Per-backend causes, in attempt order. Empty for non-exhaustion errors.
    pub fn failures(&self) -> &[BackendFailure] {
        match self {
            ConvertError::Exhausted { failures } => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backend was attempted".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A non-fatal error for a single backend attempt.
///
/// Details are kept as strings (already truncated by the runner) so the
/// value can be cloned into progress events and serialised for API callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// The executable could not be found on `PATH`.
    #[error("command '{command}' not found")]
    CommandNotFound { command: String },

    /// The OS refused to start the process.
    #[error("failed to start '{command}': {detail}")]
    SpawnFailed { command: String, detail: String },

    /// The driver script could not be written into the workspace.
    #[error("failed to write driver script '{script}': {detail}")]
    ScriptWriteFailed { script: String, detail: String },

    /// The process ran and exited with a non-zero status.
    #[error("'{command}' exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The process was terminated by a signal.
    #[error("'{command}' was terminated without an exit code: {stderr}")]
    Terminated { command: String, stderr: String },

    /// The process exceeded its time budget and was killed.
    #[error("'{command}' timed out after {timeout_ms}ms")]
    TimedOut {
        command: String,
        timeout_ms: u64,
        stderr: String,
    },

    /// The process exited cleanly but the expected output file does not exist.
    #[error("expected conversion output at {path} but file was not found")]
    MissingOutput { path: String },

    /// The output file exists but is empty.
    #[error("conversion output at {path} is empty")]
    EmptyOutput { path: String },

    /// The verified output could not be read back into memory.
    #[error("failed to read conversion output {path}: {detail}")]
    OutputReadFailed { path: String, detail: String },
}

impl BackendError {
    /// `true` when the attempt was cut short by its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::TimedOut { .. })
    }
}

/// One failed backend attempt, tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: BackendKind,
    pub error: BackendError,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}
