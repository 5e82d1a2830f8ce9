//! Configuration types for CAD-to-STL conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`] or loaded from the process environment
//! with [`ConversionConfig::from_env`]. Backend availability is derived purely
//! from which settings are present: a backend whose required setting is
//! absent is never attempted.

use crate::error::ConvertError;
use crate::pipeline::backend::BackendKind;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the local FreeCAD command.
pub const ENV_FREECAD_CMD: &str = "FREECAD_CMD";
/// Environment variable naming the CadQuery container image.
pub const ENV_CADQUERY_IMAGE: &str = "CADQUERY_DOCKER_IMAGE";
/// Environment variable holding the per-attempt timeout in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "CAD_CONVERSION_TIMEOUT_MS";
/// Environment variable overriding the container runtime binary.
pub const ENV_CONTAINER_RUNTIME: &str = "CAD_CONTAINER_RUNTIME";

/// Default per-attempt timeout: two minutes.
pub const DEFAULT_TIMEOUT_MS: u64 = 2 * 60 * 1000;
/// Default upload ceiling: 100 MiB.
pub const DEFAULT_MAX_INPUT_BYTES: usize = 100 * 1024 * 1024;
/// Default retention per captured stream: the last 64 KiB.
pub const DEFAULT_MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Meshing fidelity handed to the backend scripts through the environment.
///
/// FreeCAD reads these as `LINEAR_DEFLECTION` / `ANGULAR_DEFLECTION`,
/// CadQuery as `TOLERANCE` / `ANGULAR_TOLERANCE`. Smaller values give a
/// finer mesh and a larger STL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshTolerance {
    /// Maximum chord deviation in model length units. Default: 0.1.
    pub linear: f64,
    /// Maximum angle between adjacent facet normals in radians. Default: 0.349 (20°).
    pub angular: f64,
}

impl Default for MeshTolerance {
    fn default() -> Self {
        Self {
            linear: 0.1,
            angular: 0.349_065_850_4,
        }
    }
}

impl MeshTolerance {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }

    /// Reject zero, negative and non-finite deflections, which would let the
    /// mesher run unbounded.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(self.linear.is_finite() && self.linear > 0.0) {
            return Err(format!(
                "linear deflection must be a positive number, got {}",
                self.linear
            ));
        }
        if !(self.angular.is_finite() && self.angular > 0.0) {
            return Err(format!(
                "angular deflection must be a positive number, got {}",
                self.angular
            ));
        }
        Ok(())
    }
}

/// Configuration for CAD conversion.
///
/// # Example
/// ```rust
/// use cad2stl::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .freecad_cmd("freecadcmd")
///     .timeout_ms(60_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.available_backends().len(), 1);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Local FreeCAD command (e.g. `freecadcmd`). Enables the FreeCAD backend.
    pub freecad_cmd: Option<String>,

    /// Container image with CadQuery installed. Enables the CadQuery backend.
    pub cadquery_image: Option<String>,

    /// Binary used to run the CadQuery image. Default: `docker`.
    pub container_runtime: String,

    /// Interpreter invoked inside the container. Default: `python`.
    pub container_interpreter: String,

    /// Per-backend-attempt timeout in milliseconds. Default: 120 000.
    pub timeout_ms: u64,

    /// Default meshing fidelity; a request may override it.
    pub tolerance: MeshTolerance,

    /// Bytes retained from each of stdout/stderr per attempt. Default: 64 KiB.
    ///
    /// The tail is kept, since toolchain tracebacks end up at the bottom.
    pub max_captured_output: usize,

    /// Largest input accepted, in bytes. Default: 100 MiB.
    pub max_input_bytes: usize,

    /// Prefix for workspace directory names. Default: `cad-convert-`.
    pub workspace_prefix: String,

    /// Parent directory for workspaces. `None` uses the system temp dir.
    pub workspace_root: Option<PathBuf>,

    /// Replacement driver scripts, keyed by backend.
    pub script_overrides: HashMap<BackendKind, String>,

    /// Receives per-backend progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            freecad_cmd: None,
            cadquery_image: None,
            container_runtime: "docker".to_string(),
            container_interpreter: "python".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            tolerance: MeshTolerance::default(),
            max_captured_output: DEFAULT_MAX_CAPTURED_OUTPUT,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            workspace_prefix: "cad-convert-".to_string(),
            workspace_root: None,
            script_overrides: HashMap::new(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("freecad_cmd", &self.freecad_cmd)
            .field("cadquery_image", &self.cadquery_image)
            .field("container_runtime", &self.container_runtime)
            .field("container_interpreter", &self.container_interpreter)
            .field("timeout_ms", &self.timeout_ms)
            .field("tolerance", &self.tolerance)
            .field("max_captured_output", &self.max_captured_output)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("workspace_prefix", &self.workspace_prefix)
            .field("workspace_root", &self.workspace_root)
            .field(
                "script_overrides",
                &self.script_overrides.keys().collect::<Vec<_>>(),
            )
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from the process environment.
    ///
    /// Reads `FREECAD_CMD`, `CADQUERY_DOCKER_IMAGE`,
    /// `CAD_CONVERSION_TIMEOUT_MS` and `CAD_CONTAINER_RUNTIME`. Empty values
    /// are treated as unset.
    pub fn from_env() -> Result<Self, ConvertError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConvertError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = Self::builder();
        if let Some(cmd) = get(ENV_FREECAD_CMD) {
            builder = builder.freecad_cmd(cmd);
        }
        if let Some(image) = get(ENV_CADQUERY_IMAGE) {
            builder = builder.cadquery_image(image);
        }
        if let Some(runtime) = get(ENV_CONTAINER_RUNTIME) {
            builder = builder.container_runtime(runtime);
        }
        if let Some(raw) = get(ENV_TIMEOUT_MS) {
            let ms: u64 = raw.parse().map_err(|_| {
                ConvertError::InvalidConfig(format!(
                    "{ENV_TIMEOUT_MS} must be a whole number of milliseconds, got '{raw}'"
                ))
            })?;
            builder = builder.timeout_ms(ms);
        }
        builder.build()
    }

    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backends whose required setting is present, in priority order.
    pub fn available_backends(&self) -> Vec<BackendKind> {
        BackendKind::PRIORITY
            .into_iter()
            .filter(|b| b.is_available(self))
            .collect()
    }

    /// Names of the settings that would enable each backend.
    pub fn missing_settings(&self) -> Vec<String> {
        BackendKind::PRIORITY
            .into_iter()
            .filter(|b| !b.is_available(self))
            .map(|b| b.required_setting().to_string())
            .collect()
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn freecad_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.freecad_cmd = Some(cmd.into());
        self
    }

    pub fn cadquery_image(mut self, image: impl Into<String>) -> Self {
        self.config.cadquery_image = Some(image.into());
        self
    }

    pub fn container_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.config.container_runtime = runtime.into();
        self
    }

    pub fn container_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.config.container_interpreter = interpreter.into();
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn tolerance(mut self, tolerance: MeshTolerance) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    pub fn max_captured_output(mut self, bytes: usize) -> Self {
        self.config.max_captured_output = bytes;
        self
    }

    pub fn max_input_bytes(mut self, bytes: usize) -> Self {
        self.config.max_input_bytes = bytes;
        self
    }

    pub fn workspace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.workspace_prefix = prefix.into();
        self
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(root.into());
        self
    }

    /// Replace the embedded driver script for one backend.
    pub fn script_override(mut self, backend: BackendKind, body: impl Into<String>) -> Self {
        self.config.script_overrides.insert(backend, body.into());
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.timeout_ms == 0 {
            return Err(ConvertError::InvalidConfig(
                "Conversion timeout must be ≥ 1ms".into(),
            ));
        }
        if c.container_runtime.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "Container runtime must not be empty".into(),
            ));
        }
        if c.container_interpreter.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "Container interpreter must not be empty".into(),
            ));
        }
        if c.max_input_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "Maximum input size must be ≥ 1 byte".into(),
            ));
        }
        c.tolerance.validate().map_err(ConvertError::InvalidConfig)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.timeout_ms, 120_000);
        assert_eq!(c.tolerance.linear, 0.1);
        assert!((c.tolerance.angular - 20f64.to_radians()).abs() < 1e-9);
        assert_eq!(c.container_runtime, "docker");
        assert!(c.available_backends().is_empty());
    }

    #[test]
    fn from_lookup_reads_backend_settings() {
        let c = ConversionConfig::from_lookup(lookup(&[
            ("FREECAD_CMD", "freecadcmd"),
            ("CADQUERY_DOCKER_IMAGE", "cadquery/cadquery:latest"),
            ("CAD_CONVERSION_TIMEOUT_MS", "5000"),
        ]))
        .unwrap();
        assert_eq!(c.freecad_cmd.as_deref(), Some("freecadcmd"));
        assert_eq!(c.timeout(), Duration::from_secs(5));
        assert_eq!(
            c.available_backends(),
            vec![BackendKind::FreeCad, BackendKind::CadQuery]
        );
        assert!(c.missing_settings().is_empty());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let c = ConversionConfig::from_lookup(lookup(&[("FREECAD_CMD", "   ")])).unwrap();
        assert!(c.freecad_cmd.is_none());
        assert_eq!(
            c.missing_settings(),
            vec!["FREECAD_CMD".to_string(), "CADQUERY_DOCKER_IMAGE".to_string()]
        );
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = ConversionConfig::from_lookup(lookup(&[("CAD_CONVERSION_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_timeout_and_bad_tolerance() {
        assert!(ConversionConfig::builder().timeout_ms(0).build().is_err());
        assert!(ConversionConfig::builder()
            .tolerance(MeshTolerance::new(-1.0, 0.3))
            .build()
            .is_err());
        assert!(ConversionConfig::builder()
            .tolerance(MeshTolerance::new(0.05, f64::NAN))
            .build()
            .is_err());
    }

    #[test]
    fn debug_hides_script_bodies() {
        let c = ConversionConfig::builder()
            .script_override(BackendKind::FreeCad, "secret body")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret body"));
    }
}
