//! The conversion backends and a single attempt against one of them.
//!
//! Backends are a fixed, priority-ordered table ([`BackendKind::PRIORITY`]):
//! the local FreeCAD command first, the CadQuery container second. A backend
//! is available iff its required setting is present in the config; a
//! [`BackendDescriptor`] is the resolved, ready-to-run form of one entry.
//!
//! ## Why verify the artifact?
//!
//! Some toolchains exit 0 after printing an error, and an empty shape can
//! export as no file at all. An attempt therefore only succeeds once the
//! expected output file exists and is non-empty; the exit code alone is
//! never trusted.

use crate::config::{ConversionConfig, MeshTolerance, ENV_CADQUERY_IMAGE, ENV_FREECAD_CMD};
use crate::error::BackendError;
use crate::pipeline::runner::{CommandRunner, ExecutionOutcome, Invocation};
use crate::pipeline::workspace::Workspace;
use crate::scripts::{CADQUERY_SCRIPT, FREECAD_SCRIPT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mount point of the workspace inside the CadQuery container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Budget for `<runtime> kill` after a container attempt times out.
pub const CONTAINER_KILL_TIMEOUT: Duration = Duration::from_secs(15);

/// Identifies a conversion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local `freecadcmd` (or any FreeCAD Python launcher).
    FreeCad,
    /// CadQuery inside a container image.
    CadQuery,
}

impl BackendKind {
    /// Attempt order. Never depends on the request.
    pub const PRIORITY: [BackendKind; 2] = [BackendKind::FreeCad, BackendKind::CadQuery];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::FreeCad => "freecad",
            BackendKind::CadQuery => "cadquery",
        }
    }

    /// Setting that must be present for this backend to be attempted.
    pub fn required_setting(&self) -> &'static str {
        match self {
            BackendKind::FreeCad => ENV_FREECAD_CMD,
            BackendKind::CadQuery => ENV_CADQUERY_IMAGE,
        }
    }

    /// Filename of the driver script inside the workspace.
    pub fn script_name(&self) -> &'static str {
        match self {
            BackendKind::FreeCad => "freecad_convert.py",
            BackendKind::CadQuery => "cadquery_convert.py",
        }
    }

    pub fn default_script(&self) -> &'static str {
        match self {
            BackendKind::FreeCad => FREECAD_SCRIPT,
            BackendKind::CadQuery => CADQUERY_SCRIPT,
        }
    }

    pub fn is_available(&self, config: &ConversionConfig) -> bool {
        let setting = match self {
            BackendKind::FreeCad => config.freecad_cmd.as_deref(),
            BackendKind::CadQuery => config.cadquery_image.as_deref(),
        };
        setting.is_some_and(|s| !s.trim().is_empty())
    }

    /// Meshing parameters as the driver script expects to read them.
    pub fn env_overrides(&self, tolerance: &MeshTolerance) -> Vec<(String, String)> {
        let (linear_key, angular_key) = match self {
            BackendKind::FreeCad => ("LINEAR_DEFLECTION", "ANGULAR_DEFLECTION"),
            BackendKind::CadQuery => ("TOLERANCE", "ANGULAR_TOLERANCE"),
        };
        vec![
            (linear_key.to_string(), tolerance.linear.to_string()),
            (angular_key.to_string(), tolerance.angular.to_string()),
        ]
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a backend's process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `<command> <script> <input> <output>`
    Local { command: String },
    /// `<runtime> run --rm -v <ws>:/workspace [-e K=V]… <image> <interpreter> /workspace/<script> …`
    Container {
        runtime: String,
        image: String,
        interpreter: String,
    },
}

/// A backend resolved against a configuration, ready to run.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub launcher: Launcher,
    /// Driver script body written into the workspace.
    pub script: String,
    pub timeout_ms: u64,
    pub capture_limit: usize,
}

/// Host paths involved in one attempt.
#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub workspace: PathBuf,
    pub script: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl BackendDescriptor {
    /// Resolve `kind`, or `None` when its setting is absent.
    pub fn resolve(kind: BackendKind, config: &ConversionConfig) -> Option<Self> {
        if !kind.is_available(config) {
            return None;
        }
        let launcher = match kind {
            BackendKind::FreeCad => Launcher::Local {
                command: config.freecad_cmd.clone()?,
            },
            BackendKind::CadQuery => Launcher::Container {
                runtime: config.container_runtime.clone(),
                image: config.cadquery_image.clone()?,
                interpreter: config.container_interpreter.clone(),
            },
        };
        let script = config
            .script_overrides
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_script().to_string());
        Some(Self {
            kind,
            launcher,
            script,
            timeout_ms: config.timeout_ms,
            capture_limit: config.max_captured_output,
        })
    }

    /// Every available backend, in priority order.
    pub fn available(config: &ConversionConfig) -> Vec<Self> {
        BackendKind::PRIORITY
            .into_iter()
            .filter_map(|kind| Self::resolve(kind, config))
            .collect()
    }

    /// Program that will be spawned, e.g. `freecadcmd` or `docker`.
    pub fn program(&self) -> &str {
        match &self.launcher {
            Launcher::Local { command } => command,
            Launcher::Container { runtime, .. } => runtime,
        }
    }

    /// Build the command for one attempt.
    pub fn invocation(&self, paths: &AttemptPaths, tolerance: &MeshTolerance) -> Invocation {
        let env_overrides = self.kind.env_overrides(tolerance);
        let (args, env) = match &self.launcher {
            Launcher::Local { .. } => (
                vec![
                    path_arg(&paths.script),
                    path_arg(&paths.input),
                    path_arg(&paths.output),
                ],
                env_overrides,
            ),
            Launcher::Container {
                image, interpreter, ..
            } => {
                let mut args = vec![
                    "run".to_string(),
                    "--rm".to_string(),
                    "-v".to_string(),
                    format!(
                        "{}:{}",
                        path_arg(&paths.workspace).replace('\\', "/"),
                        CONTAINER_WORKSPACE
                    ),
                    "--name".to_string(),
                    container_name(&paths.workspace),
                ];
                // Host env does not reach the container.
                for (key, value) in &env_overrides {
                    args.push("-e".to_string());
                    args.push(format!("{key}={value}"));
                }
                args.push(image.clone());
                args.push(interpreter.clone());
                for path in [&paths.script, &paths.input, &paths.output] {
                    args.push(container_path(path));
                }
                (args, Vec::new())
            }
        };

        Invocation {
            program: self.program().to_string(),
            args,
            cwd: Some(paths.workspace.clone()),
            env,
            timeout: Duration::from_millis(self.timeout_ms),
            capture_limit: self.capture_limit,
        }
    }

    /// Command that stops a container left behind by a timed-out attempt.
    ///
    /// Killing the runtime client does not stop the container itself, and
    /// `--rm` only removes it once it exits. `None` for local backends, whose
    /// process is killed directly.
    pub fn cleanup_invocation(&self, paths: &AttemptPaths) -> Option<Invocation> {
        let Launcher::Container { runtime, .. } = &self.launcher else {
            return None;
        };
        let mut kill = Invocation::new(
            runtime.clone(),
            vec!["kill".to_string(), container_name(&paths.workspace)],
        );
        kill.cwd = Some(paths.workspace.clone());
        kill.timeout = CONTAINER_KILL_TIMEOUT;
        kill.capture_limit = self.capture_limit;
        Some(kill)
    }
}

/// Container name for the attempt running in `workspace`.
///
/// Workspace directory names are unique per request; any character a
/// runtime would reject becomes `-`.
pub fn container_name(workspace: &Path) -> String {
    let dir: String = workspace
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("cad2stl-{dir}")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn container_path(host: &Path) -> String {
    let name = host
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{CONTAINER_WORKSPACE}/{name}")
}

/// An output file that passed verification and was read into memory.
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    pub(crate) filename: String,
    pub(crate) bytes: Vec<u8>,
}

impl VerifiedArtifact {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Map a finished process onto success or a [`BackendError`].
pub fn classify(outcome: &ExecutionOutcome, invocation: &Invocation) -> Result<(), BackendError> {
    if outcome.timed_out {
        return Err(BackendError::TimedOut {
            command: invocation.program.clone(),
            timeout_ms: invocation.timeout.as_millis() as u64,
            stderr: outcome.stderr.clone(),
        });
    }
    match outcome.exit_code {
        Some(0) => Ok(()),
        Some(code) => Err(BackendError::NonZeroExit {
            command: invocation.program.clone(),
            code,
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
        }),
        None => Err(BackendError::Terminated {
            command: invocation.program.clone(),
            stderr: outcome.stderr.clone(),
        }),
    }
}

/// Confirm the artifact exists and is non-empty; returns its size.
pub async fn verify_output(path: &Path) -> Result<u64, BackendError> {
    let display = path.display().to_string();
    match tokio::fs::metadata(path).await {
        Ok(meta) if !meta.is_file() => Err(BackendError::MissingOutput { path: display }),
        Ok(meta) if meta.len() == 0 => Err(BackendError::EmptyOutput { path: display }),
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BackendError::MissingOutput { path: display })
        }
        Err(e) => Err(BackendError::OutputReadFailed {
            path: display,
            detail: e.to_string(),
        }),
    }
}

/// Best effort: a container that outlives its client is killed by name.
async fn stop_leftover(backend: &BackendDescriptor, runner: &dyn CommandRunner, paths: &AttemptPaths) {
    let Some(kill) = backend.cleanup_invocation(paths) else {
        return;
    };
    info!("{} timed out, running: {}", backend.kind, kill.command_line());
    match runner.run(&kill).await {
        Ok(outcome) if outcome.success() => {}
        // Non-zero usually means the container already exited.
        Ok(outcome) => debug!(
            "'{}' exited with {:?}: {}",
            kill.command_line(),
            outcome.exit_code,
            outcome.stderr.trim()
        ),
        Err(e) => warn!("Could not stop container after timeout: {}", e),
    }
}

/// Run one backend against a staged input.
///
/// Writes the driver script, runs it, removes the script whatever happened,
/// then verifies and reads the artifact. Any leftover output from an earlier
/// backend is deleted first so it can never be mistaken for this one's.
pub async fn attempt(
    backend: &BackendDescriptor,
    runner: &dyn CommandRunner,
    workspace: &Workspace,
    input: &Path,
    output_filename: &str,
    tolerance: &MeshTolerance,
) -> Result<VerifiedArtifact, BackendError> {
    let output = workspace.join(output_filename);
    workspace.remove_file(&output).await;

    let script_name = backend.kind.script_name();
    let script = workspace
        .write_file(script_name, backend.script.as_bytes())
        .await
        .map_err(|e| BackendError::ScriptWriteFailed {
            script: script_name.to_string(),
            detail: e.to_string(),
        })?;

    let paths = AttemptPaths {
        workspace: workspace.path().to_path_buf(),
        script: script.clone(),
        input: input.to_path_buf(),
        output: output.clone(),
    };
    let invocation = backend.invocation(&paths, tolerance);
    debug!("{}: {}", backend.kind, invocation.command_line());

    let ran = runner.run(&invocation).await;
    if matches!(ran, Ok(ref outcome) if outcome.timed_out) {
        stop_leftover(backend, runner, &paths).await;
    }
    workspace.remove_file(&script).await;
    let outcome = ran?;
    classify(&outcome, &invocation)?;

    let size = verify_output(&output).await?;
    let bytes = tokio::fs::read(&output)
        .await
        .map_err(|e| BackendError::OutputReadFailed {
            path: output.display().to_string(),
            detail: e.to_string(),
        })?;
    info!(
        "{} produced {} ({} bytes) in {:?}",
        backend.kind, output_filename, size, outcome.duration
    );

    Ok(VerifiedArtifact {
        filename: output_filename.to_string(),
        bytes,
    })
}
