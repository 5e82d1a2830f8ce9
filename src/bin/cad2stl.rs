//! CLI binary for cad2stl.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use cad2stl::sanitize::base_name_from_filename;
use cad2stl::{
    backend_status, write_artifact, BackendKind, ConversionConfig, ConversionProgressCallback,
    ConversionRequest, ConvertError, Converter, MeshTolerance, ProgressCallback,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner naming the backend currently running, with one log line per attempt.
struct CliProgressCallback {
    bar: ProgressBar,
    started: std::sync::Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: std::sync::Mutex::new(None),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .started
            .lock()
            .ok()
            .and_then(|g| *g)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, filename: &str) {
        self.bar.set_message(filename.to_string());
    }

    fn on_backend_start(&self, backend: BackendKind) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_prefix(format!("{backend}"));
    }

    fn on_backend_complete(&self, backend: BackendKind, bytes: usize) {
        self.bar.println(format!(
            "  {} {:<9} {}  {}",
            green("✓"),
            backend,
            dim(&format!("{bytes} bytes")),
            self.elapsed()
        ));
    }

    fn on_backend_error(&self, backend: BackendKind, error: &str) {
        // Keep the log line to the first line of the cause.
        let first = error.lines().next().unwrap_or(error);
        let msg = if first.chars().count() > 100 {
            format!("{}\u{2026}", first.chars().take(99).collect::<String>())
        } else {
            first.to_string()
        };
        self.bar.println(format!(
            "  {} {:<9} {}  {}",
            red("✗"),
            backend,
            red(&msg),
            self.elapsed()
        ));
    }

    fn on_conversion_complete(&self, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert with a local FreeCAD install
  cad2stl --freecad-cmd freecadcmd bracket.step

  # Container only, custom output path
  cad2stl --cadquery-image cadquery/cadquery:2.4 housing.igs -o out/housing.stl

  # Finer mesh
  cad2stl --linear-deflection 0.01 --angular-deflection 0.1 gear.stp

  # Which backends would run?
  cad2stl --check

  # Machine-readable result
  cad2stl --json part.step

BACKENDS (tried in this order):
  freecad    FREECAD_CMD             <cmd> freecad_convert.py <in> <out>
  cadquery   CADQUERY_DOCKER_IMAGE   docker run --rm -v <ws>:/workspace <image> python …

ENVIRONMENT VARIABLES:
  FREECAD_CMD                 FreeCAD launcher (e.g. freecadcmd)
  CADQUERY_DOCKER_IMAGE       Image with CadQuery installed
  CAD_CONTAINER_RUNTIME       Container binary (default: docker)
  CAD2STL_CONTAINER_INTERPRETER  Interpreter inside the image (default: python)
  CAD_CONVERSION_TIMEOUT_MS   Per-backend timeout (default: 120000)
  RUST_LOG                    Log filter, overrides --verbose/--quiet

EXIT CODES:
  0  STL written (or input already STL)
  1  Conversion failed or bad input
  2  No backend configured
"#;

/// Convert STEP/IGES CAD models to STL.
#[derive(Parser, Debug)]
#[command(
    name = "cad2stl",
    version,
    about = "Convert STEP/IGES CAD models to STL via FreeCAD or CadQuery",
    long_about = "Convert CAD models (.step, .stp, .iges, .igs, .f3z) to STL by running \
FreeCAD locally or CadQuery in a container. Backends are tried in priority order; the first \
one that produces a non-empty STL wins. STL inputs are passed through unchanged.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// CAD file to convert.
    #[arg(required_unless_present = "check")]
    input: Option<PathBuf>,

    /// Write the STL here. Default: `<base>.stl` in the current directory.
    #[arg(short, long, env = "CAD2STL_OUTPUT")]
    output: Option<PathBuf>,

    /// Artifact base name. Default: the sanitised input file stem.
    #[arg(long)]
    base_name: Option<String>,

    /// FreeCAD launcher; enables the FreeCAD backend.
    #[arg(long, env = "FREECAD_CMD")]
    freecad_cmd: Option<String>,

    /// CadQuery container image; enables the CadQuery backend.
    #[arg(long, env = "CADQUERY_DOCKER_IMAGE")]
    cadquery_image: Option<String>,

    /// Container runtime binary.
    #[arg(long, env = "CAD_CONTAINER_RUNTIME", default_value = "docker")]
    container_runtime: String,

    /// Interpreter run inside the CadQuery container.
    #[arg(long, env = "CAD2STL_CONTAINER_INTERPRETER", default_value = "python")]
    container_interpreter: String,

    /// Per-backend timeout in milliseconds.
    #[arg(long, env = "CAD_CONVERSION_TIMEOUT_MS", default_value_t = 120_000,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: u64,

    /// Maximum chord deviation of the mesh, in model units.
    #[arg(long, env = "CAD2STL_LINEAR_DEFLECTION", default_value_t = 0.1)]
    linear_deflection: f64,

    /// Maximum angle between adjacent facets, in radians.
    #[arg(long, env = "CAD2STL_ANGULAR_DEFLECTION", default_value_t = 0.349_065_850_4)]
    angular_deflection: f64,

    /// Bytes of stdout/stderr kept per backend attempt.
    #[arg(long, env = "CAD2STL_MAX_CAPTURED_OUTPUT", default_value_t = 64 * 1024)]
    max_captured_output: usize,

    /// Print backend availability and exit.
    #[arg(long)]
    check: bool,

    /// Print result metadata (or the structured error) as JSON on stdout.
    #[arg(long, env = "CAD2STL_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "CAD2STL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CAD2STL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CAD2STL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already shows each attempt; keep library logs at warn
    // unless asked for more.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli, show_progress).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, show_progress: bool) -> Result<ExitCode> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Check-only mode ──────────────────────────────────────────────────
    if cli.check {
        let status = backend_status(&config);
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("Failed to serialise status")?
            );
        } else {
            for s in &status {
                let mark = if s.available { green("✓") } else { red("✗") };
                let detail = s
                    .command
                    .clone()
                    .unwrap_or_else(|| format!("set {}", s.setting));
                println!("{} {:<9} {}", mark, s.backend, dim(&detail));
            }
        }
        let any = status.iter().any(|s| s.available);
        return Ok(if any { ExitCode::SUCCESS } else { ExitCode::from(2) });
    }

    let input = cli
        .input
        .clone()
        .context("An input file is required unless --check is given")?;

    // ── Build request ────────────────────────────────────────────────────
    let bytes = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = cli
        .base_name
        .clone()
        .unwrap_or_else(|| base_name_from_filename(&filename));
    let request = ConversionRequest::new(bytes, filename, base);

    // ── Run conversion ───────────────────────────────────────────────────
    let converter = Converter::new(config);
    let result = match converter.convert(&request).await {
        Ok(result) => result,
        Err(e) => return Ok(report_failure(&e, cli.json)),
    };

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&result.filename));
    write_artifact(&result, &output_path)
        .await
        .context("Failed to write STL")?;

    if cli.json {
        let mut meta = serde_json::to_value(&result).context("Failed to serialise result")?;
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("size".into(), result.size().into());
            obj.insert(
                "path".into(),
                output_path.display().to_string().into(),
            );
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&meta).context("Failed to serialise result")?
        );
    } else if !cli.quiet {
        let how = match result.backend {
            Some(b) if result.fallbacks.is_empty() => format!("via {b}"),
            Some(b) => format!("via {b} after {} fallback(s)", result.fallbacks.len()),
            None => "already STL, copied".to_string(),
        };
        eprintln!(
            "{}  {}  {}  {}ms  →  {}",
            green("✔"),
            how,
            dim(&format!("{} bytes", result.size())),
            result.duration_ms,
            bold(&output_path.display().to_string()),
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Print a conversion failure and choose the exit code.
fn report_failure(e: &ConvertError, json: bool) -> ExitCode {
    if json {
        let body = serde_json::json!({
            "code": e.code(),
            "message": e.to_string(),
            "causes": e.failures(),
        });
        println!("{body:#}");
    } else {
        match e {
            ConvertError::Exhausted { failures } => {
                eprintln!("{} CAD conversion failed", red("✘"));
                for f in failures {
                    eprintln!("  {} {}", red(f.backend.name()), f.error);
                }
            }
            other => eprintln!("{} {}", red("✘"), other),
        }
    }
    if e.is_configuration() {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .container_runtime(cli.container_runtime.clone())
        .container_interpreter(cli.container_interpreter.clone())
        .timeout_ms(cli.timeout_ms)
        .tolerance(MeshTolerance::new(
            cli.linear_deflection,
            cli.angular_deflection,
        ))
        .max_captured_output(cli.max_captured_output);

    if let Some(ref cmd) = cli.freecad_cmd {
        if !cmd.trim().is_empty() {
            builder = builder.freecad_cmd(cmd.clone());
        }
    }
    if let Some(ref image) = cli.cadquery_image {
        if !image.trim().is_empty() {
            builder = builder.cadquery_image(image.clone());
        }
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
