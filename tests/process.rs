//! Tests that spawn real processes through `sh`.
//!
//! `sh` stands in for the FreeCAD launcher: with a script override the
//! driver "script" becomes a shell snippet, invoked as
//! `sh <script> <input> <output>`, so `$1` is the input and `$2` the output.

#![cfg(unix)]

use cad2stl::{
    convert, convert_to_file, BackendError, BackendKind, CommandRunner, ConversionConfig,
    ConversionRequest, ConvertError, Invocation, ProcessRunner,
};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("cad2stl=debug")
        .try_init();
}

fn sh(snippet: &str) -> Invocation {
    let mut inv = Invocation::new("sh", vec!["-c".to_string(), snippet.to_string()]);
    inv.timeout = Duration::from_secs(10);
    inv
}

// ── ProcessRunner ────────────────────────────────────────────────────────────

#[tokio::test]
async fn captures_exit_code_and_both_streams() {
    init_tracing();
    let outcome = assert_ok!(
        ProcessRunner
            .run(&sh("echo hi; echo err >&2; exit 3"))
            .await
    );
    assert_eq!(outcome.exit_code, Some(3));
    assert!(!outcome.success());
    assert!(!outcome.timed_out);
    assert_eq!(outcome.stdout.trim(), "hi");
    assert_eq!(outcome.stderr.trim(), "err");
}

#[tokio::test]
async fn kills_on_timeout() {
    init_tracing();
    let mut inv = sh("sleep 5");
    inv.timeout = Duration::from_millis(200);

    let started = Instant::now();
    let outcome = assert_ok!(ProcessRunner.run(&inv).await);

    assert!(outcome.timed_out);
    assert_eq!(outcome.exit_code, None);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn missing_binary_is_command_not_found() {
    let inv = Invocation::new("cad2stl-no-such-tool-7f3a", vec![]);
    let err = assert_err!(ProcessRunner.run(&inv).await);
    assert_eq!(
        err,
        BackendError::CommandNotFound {
            command: "cad2stl-no-such-tool-7f3a".into()
        }
    );
}

#[tokio::test]
async fn captured_output_keeps_the_tail() {
    let mut inv = sh("i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done; echo LAST");
    inv.capture_limit = 256;

    let outcome = assert_ok!(ProcessRunner.run(&inv).await);

    assert!(outcome.success());
    assert!(outcome.stdout.contains("earlier bytes truncated"));
    assert!(outcome.stdout.trim_end().ends_with("LAST"));
    assert!(!outcome.stdout.contains("line-0\n"));
    assert!(outcome.stdout.len() < 512);
}

#[tokio::test]
async fn env_and_cwd_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let mut inv = sh("printf '%s' \"$LINEAR_DEFLECTION\" > seen.txt");
    inv.cwd = Some(dir.path().to_path_buf());
    inv.env = vec![("LINEAR_DEFLECTION".into(), "0.05".into())];

    let outcome = assert_ok!(ProcessRunner.run(&inv).await);

    assert!(outcome.success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("seen.txt")).unwrap(),
        "0.05"
    );
}

// ── Converter end to end ─────────────────────────────────────────────────────

fn sh_backend(root: &std::path::Path, snippet: &str) -> ConversionConfig {
    ConversionConfig::builder()
        .freecad_cmd("sh")
        .script_override(BackendKind::FreeCad, snippet)
        .workspace_root(root)
        .timeout_ms(5_000)
        .build()
        .unwrap()
}

fn is_empty_dir(path: &std::path::Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn shell_backend_produces_artifact() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = sh_backend(
        root.path(),
        "printf 'solid x\\n' > \"$2\"; cat \"$1\" >> \"$2\"; printf 'endsolid x\\n' >> \"$2\"",
    );
    let request = ConversionRequest::new(b"FACETS\n".to_vec(), "Widget.step", "Widget");

    let result = assert_ok!(convert(&request, &config).await);

    assert_eq!(result.backend, Some(BackendKind::FreeCad));
    assert_eq!(result.filename, "widget.stl");
    assert_eq!(result.bytes, b"solid x\nFACETS\nendsolid x\n");
    assert!(is_empty_dir(root.path()), "workspace must be removed");
}

#[tokio::test]
async fn shell_backend_failure_carries_stderr() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = sh_backend(root.path(), "echo 'Part.Shape is null' >&2; exit 2");

    let err = assert_err!(
        convert(&ConversionRequest::new(b"x".to_vec(), "a.step", "a"), &config).await
    );

    match err.failures() {
        [failure] => match &failure.error {
            BackendError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(*code, 2);
                assert!(stderr.contains("Part.Shape is null"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        },
        other => panic!("expected one failure, got {other:?}"),
    }
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn shell_backend_exit_zero_without_output() {
    let root = tempfile::tempdir().unwrap();
    let config = sh_backend(root.path(), "exit 0");

    let err = assert_err!(
        convert(&ConversionRequest::new(b"x".to_vec(), "a.stp", "a"), &config).await
    );

    assert!(matches!(
        err.failures()[0].error,
        BackendError::MissingOutput { .. }
    ));
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn shell_backend_timeout_is_reported_and_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .freecad_cmd("sh")
        .script_override(BackendKind::FreeCad, "sleep 5")
        .workspace_root(root.path())
        .timeout_ms(200)
        .build()
        .unwrap();

    let started = Instant::now();
    let err = assert_err!(
        convert(&ConversionRequest::new(b"x".to_vec(), "a.iges", "a"), &config).await
    );

    assert!(err.failures()[0].error.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn unknown_launcher_is_a_backend_failure() {
    let root = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .freecad_cmd("cad2stl-no-such-tool-7f3a")
        .workspace_root(root.path())
        .build()
        .unwrap();

    let err = assert_err!(
        convert(&ConversionRequest::new(b"x".to_vec(), "a.step", "a"), &config).await
    );

    assert!(!err.is_configuration());
    assert!(matches!(err, ConvertError::Exhausted { .. }));
    assert!(matches!(
        err.failures()[0].error,
        BackendError::CommandNotFound { .. }
    ));
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn convert_to_file_writes_artifact() {
    let root = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let config = sh_backend(root.path(), "cp \"$1\" \"$2\"");
    let target = out_dir.path().join("models/bracket.stl");

    let request = ConversionRequest::new(b"solid b\nendsolid b\n".to_vec(), "bracket.step", "bracket");
    let result = assert_ok!(convert_to_file(&request, &target, &config).await);

    assert_eq!(std::fs::read(&target).unwrap(), result.bytes);
    assert_eq!(result.bytes, b"solid b\nendsolid b\n");
}

#[tokio::test]
async fn convert_file_reads_from_disk() {
    let root = tempfile::tempdir().unwrap();
    let src_dir = tempfile::tempdir().unwrap();
    let input = src_dir.path().join("Gear Box.STEP");
    std::fs::write(&input, b"solid g\nendsolid g\n").unwrap();
    let config = sh_backend(root.path(), "cp \"$1\" \"$2\"");

    let result = assert_ok!(cad2stl::convert_file(&input, &config).await);

    assert_eq!(result.filename, "gear-box.stl");
    assert_eq!(result.bytes, b"solid g\nendsolid g\n");
}

#[tokio::test]
async fn convert_file_missing_input() {
    let err = assert_err!(
        cad2stl::convert_file("/nonexistent/cad2stl/part.step", &ConversionConfig::default()).await
    );
    assert!(matches!(err, ConvertError::InputReadFailed { .. }));
}
