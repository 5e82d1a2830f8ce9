//! # cad2stl
//!
//! Convert STEP / IGES CAD models to STL by orchestrating external geometry
//! toolkits (FreeCAD, CadQuery) as isolated subprocesses.
//!
//! ## Why subprocesses?
//!
//! B-rep kernels are large, crash-prone C++ stacks with Python front ends.
//! Running them out of process keeps a segfault or a runaway mesher from
//! taking the host service down, lets each attempt be killed on a timeout,
//! and makes the toolchain swappable (local install vs. container image)
//! without touching the orchestration logic.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes + filename
//!  │
//!  ├─ 1. Validate   accepted extension, size limit
//!  ├─ 2. Skip       already .stl → return input unchanged
//!  ├─ 3. Workspace  fresh tempdir, stage input
//!  ├─ 4. Backends   FreeCAD → CadQuery, first verified artifact wins
//!  └─ 5. Cleanup    workspace removed on every path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cad2stl::{Converter, ConversionConfig, ConversionRequest, ConvertError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // FREECAD_CMD and/or CADQUERY_DOCKER_IMAGE enable the backends.
//!     let converter = Converter::new(ConversionConfig::from_env()?);
//!     let bytes = std::fs::read("bracket.step")?;
//!     let request = ConversionRequest::new(bytes, "bracket.step", "bracket");
//!
//!     match converter.convert(&request).await {
//!         Ok(stl) => std::fs::write(&stl.filename, &stl.bytes)?,
//!         Err(e @ ConvertError::NotConfigured { .. }) => eprintln!("service unavailable: {e}"),
//!         Err(e) => {
//!             for cause in e.failures() {
//!                 eprintln!("{cause}");
//!             }
//!             return Err(e.into());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cad2stl` binary (clap + anyhow + tracing-subscriber) |
//!
//! ## Backends
//!
//! | Priority | Backend | Enabled by | Runs |
//! |----------|---------|------------|------|
//! | 1 | FreeCAD  | `FREECAD_CMD` | `<cmd> freecad_convert.py <in> <out>` |
//! | 2 | CadQuery | `CADQUERY_DOCKER_IMAGE` | `docker run --rm -v <ws>:/workspace <image> python …` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod sanitize;
pub mod scripts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, MeshTolerance};
pub use convert::{
    backend_status, convert, convert_file, convert_sync, convert_to_file, write_artifact,
    Converter,
};
pub use error::{BackendError, BackendFailure, ConvertError};
pub use output::{BackendStatus, ConversionResult, STL_CONTENT_TYPE};
pub use pipeline::backend::{BackendDescriptor, BackendKind};
pub use pipeline::runner::{CommandRunner, ExecutionOutcome, Invocation, ProcessRunner};
pub use pipeline::workspace::Workspace;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{CadFormat, ConversionRequest};
