//! Conversion orchestration: pick backends, try them in order, clean up.
//!
//! ## Request lifecycle
//!
//! ```text
//! Start ─┬─ input is .stl ──────────────────────────────▶ Done (skipped)
//!        ├─ no backend configured ──────────────────────▶ Failed (NotConfigured)
//!        └─ acquire workspace, stage input
//!             └─ backend[i] ─┬─ verified artifact ───────▶ Done
//!                            └─ error → record, i += 1
//!                                 └─ none left ──────────▶ Failed (Exhausted)
//!           workspace released on every path out
//! ```
//!
//! Attempts for one request are strictly sequential: only the first success
//! matters, and every backend writes to the same output path. Many requests
//! may run concurrently; each owns its own workspace.

use crate::config::ConversionConfig;
use crate::error::{BackendFailure, ConvertError};
use crate::output::{BackendStatus, ConversionResult};
use crate::pipeline::backend::{self, BackendDescriptor, BackendKind, VerifiedArtifact};
use crate::pipeline::runner::{CommandRunner, ProcessRunner};
use crate::pipeline::workspace::Workspace;
use crate::request::ConversionRequest;
use crate::sanitize::safe_filename_segment;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Converts CAD files to STL using the configured backends.
///
/// Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Converter {
    config: ConversionConfig,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("runner", &"<dyn CommandRunner>")
            .finish()
    }
}

impl Converter {
    /// Converter that spawns real processes.
    pub fn new(config: ConversionConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    /// Converter with a custom process runner (tests, sandboxes, remote exec).
    pub fn with_runner(config: ConversionConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert one request to STL.
    ///
    /// # Errors
    /// - [`ConvertError::UnsupportedFormat`] / [`ConvertError::InputTooLarge`] for bad input
    /// - [`ConvertError::InvalidInput`] for a per-request tolerance that is not positive and finite
    /// - [`ConvertError::NotConfigured`] when no backend is configured; nothing is spawned
    /// - [`ConvertError::Workspace`] when the scratch directory cannot be set up
    /// - [`ConvertError::Exhausted`] with every backend's cause when all of them failed
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let start = Instant::now();
        let format = request.format()?;
        let size = request.bytes().len();
        if size > self.config.max_input_bytes {
            return Err(ConvertError::InputTooLarge {
                size,
                limit: self.config.max_input_bytes,
            });
        }

        if let Some(tolerance) = request.tolerance() {
            tolerance.validate().map_err(ConvertError::InvalidInput)?;
        }

        let base = safe_filename_segment(request.output_base_name());
        let output_filename = format!("{base}.stl");

        // ── Short-circuit: already STL ───────────────────────────────────
        if format.is_target() {
            info!(
                "'{}' is already STL, skipping conversion",
                request.original_filename()
            );
            return Ok(ConversionResult::skipped(
                request.bytes().to_vec(),
                output_filename,
            ));
        }

        // ── Resolve backends before touching the filesystem ──────────────
        let backends = BackendDescriptor::available(&self.config);
        if backends.is_empty() {
            let missing = self.config.missing_settings();
            error!("No CAD conversion backend configured (missing {:?})", missing);
            return Err(ConvertError::NotConfigured { missing });
        }

        info!(
            "Converting '{}' ({} bytes) with {} backend(s)",
            request.original_filename(),
            size,
            backends.len()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_start(request.original_filename());
        }

        // ── Attempt backends inside one workspace ────────────────────────
        let workspace = match Workspace::acquire(
            self.config.workspace_root.as_deref(),
            &self.config.workspace_prefix,
        ) {
            Ok(ws) => ws,
            Err(e) => {
                error!("Could not set up a conversion workspace: {}", e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_complete(false);
                }
                return Err(e);
            }
        };
        let attempted = self
            .run_backends(&workspace, request, &base, &output_filename, &backends)
            .await;
        workspace.release().await;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_complete(attempted.is_ok());
        }

        let (artifact, backend, fallbacks) = attempted?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Converted '{}' → {} via {} in {}ms",
            request.original_filename(),
            artifact.filename(),
            backend,
            duration_ms
        );
        Ok(ConversionResult::converted(
            artifact,
            backend,
            fallbacks,
            duration_ms,
        ))
    }

    /// Stage the input and walk the backend list until one succeeds.
    async fn run_backends(
        &self,
        workspace: &Workspace,
        request: &ConversionRequest,
        base: &str,
        output_filename: &str,
        backends: &[BackendDescriptor],
    ) -> Result<(VerifiedArtifact, BackendKind, Vec<BackendFailure>), ConvertError> {
        let input_filename = format!("{}{}", base, request.extension());
        let input = workspace.stage(&input_filename, request.bytes()).await?;
        debug!("Staged input at {}", input.display());

        let tolerance = request.tolerance().unwrap_or(self.config.tolerance);
        let mut failures: Vec<BackendFailure> = Vec::new();

        for descriptor in backends {
            let kind = descriptor.kind;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_backend_start(kind);
            }

            match backend::attempt(
                descriptor,
                self.runner.as_ref(),
                workspace,
                &input,
                output_filename,
                &tolerance,
            )
            .await
            {
                Ok(artifact) => {
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_backend_complete(kind, artifact.bytes().len());
                    }
                    if !failures.is_empty() {
                        info!(
                            "{} succeeded after {} earlier backend(s) failed",
                            kind,
                            failures.len()
                        );
                    }
                    return Ok((artifact, kind, failures));
                }
                Err(e) => {
                    warn!("{} conversion failed: {}", kind, e);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_backend_error(kind, &e.to_string());
                    }
                    failures.push(BackendFailure {
                        backend: kind,
                        error: e,
                    });
                }
            }
        }

        error!(
            "All {} CAD conversion backend(s) failed for '{}'",
            failures.len(),
            request.original_filename()
        );
        Err(ConvertError::Exhausted { failures })
    }
}

/// Convert a request with real subprocesses.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use cad2stl::{convert, ConversionConfig, ConversionRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::from_env()?;
/// let bytes = std::fs::read("bracket.step")?;
/// let request = ConversionRequest::new(bytes, "bracket.step", "bracket");
/// let result = convert(&request, &config).await?;
/// std::fs::write(&result.filename, &result.bytes)?;
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    Converter::new(config.clone()).convert(request).await
}

/// Read a CAD file from disk and convert it.
///
/// The artifact is named after the sanitised file stem.
pub async fn convert_file(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    let request = ConversionRequest::from_path(path).await?;
    convert(&request, config).await
}

/// Convert and write the STL directly to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    request: &ConversionRequest,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    let result = convert(request, config).await?;
    write_artifact(&result, output_path.as_ref()).await?;
    Ok(result)
}

/// Write an artifact atomically: temp sibling, then rename.
pub async fn write_artifact(result: &ConversionResult, path: &Path) -> Result<(), ConvertError> {
    let write_err = |e| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("stl.tmp");
    tokio::fs::write(&tmp_path, &result.bytes)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(request, config))
}

/// Report which backends the configuration enables, in priority order.
///
/// Spawns nothing; availability is purely a matter of configuration.
pub fn backend_status(config: &ConversionConfig) -> Vec<BackendStatus> {
    BackendKind::PRIORITY
        .into_iter()
        .map(|kind| {
            let descriptor = BackendDescriptor::resolve(kind, config);
            BackendStatus {
                backend: kind,
                available: descriptor.is_some(),
                setting: kind.required_setting().to_string(),
                command: descriptor.map(|d| match d.launcher {
                    backend::Launcher::Local { command } => command,
                    backend::Launcher::Container { runtime, image, .. } => {
                        format!("{runtime} run --rm {image}")
                    }
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_status_reports_both_backends() {
        let config = ConversionConfig::builder()
            .cadquery_image("cadquery/cadquery:2.4")
            .build()
            .unwrap();
        let status = backend_status(&config);
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].backend, BackendKind::FreeCad);
        assert!(!status[0].available);
        assert_eq!(status[0].setting, "FREECAD_CMD");
        assert!(status[0].command.is_none());
        assert!(status[1].available);
        assert_eq!(
            status[1].command.as_deref(),
            Some("docker run --rm cadquery/cadquery:2.4")
        );
    }

    #[tokio::test]
    async fn write_artifact_is_atomic_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/nested/part.stl");
        let result = ConversionResult::skipped(b"solid a\nendsolid a\n".to_vec(), "part.stl".into());
        write_artifact(&result, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), result.bytes);
        assert!(!target.with_extension("stl.tmp").exists());
    }

    #[test]
    fn convert_sync_skips_stl_without_backends() {
        let request = ConversionRequest::new(b"solid s".to_vec(), "s.stl", "s");
        let result = convert_sync(&request, &ConversionConfig::default()).unwrap();
        assert!(result.skipped);
        assert_eq!(result.bytes, b"solid s");
    }
}
