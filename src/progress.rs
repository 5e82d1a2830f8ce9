//! Progress-callback trait for per-backend conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks the backend list. The CLI uses this to
//! drive its spinner; a server can forward the events to a job record.
//!
//! # Example
//!
//! ```rust
//! use cad2stl::{BackendKind, ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FallbackCounter {
//!     failures: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for FallbackCounter {
//!     fn on_backend_error(&self, backend: BackendKind, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{backend} failed: {error}");
//!     }
//! }
//!
//! let counter = Arc::new(FallbackCounter { failures: AtomicUsize::new(0) });
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::backend::BackendKind;
use std::sync::Arc;

/// Called by the orchestrator as it processes one request.
///
/// Implementations must be `Send + Sync`: many requests may share one config
/// across tokio tasks. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once per request that needs a backend (not for skipped STLs).
    fn on_conversion_start(&self, filename: &str) {
        let _ = filename;
    }

    /// Called just before a backend's process is spawned.
    fn on_backend_start(&self, backend: BackendKind) {
        let _ = backend;
    }

    /// Called when a backend produced a verified artifact of `bytes` bytes.
    fn on_backend_complete(&self, backend: BackendKind, bytes: usize) {
        let _ = (backend, bytes);
    }

    /// Called when a backend attempt failed and the orchestrator moves on.
    fn on_backend_error(&self, backend: BackendKind, error: &str) {
        let _ = (backend, error);
    }

    /// Called once after the last attempt, whatever the outcome.
    fn on_conversion_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConversionProgressCallback for Recorder {
        fn on_backend_start(&self, backend: BackendKind) {
            self.events.lock().unwrap().push(format!("start {backend}"));
        }

        fn on_backend_error(&self, backend: BackendKind, error: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("error {backend}: {error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start("part.step");
        cb.on_backend_start(BackendKind::FreeCad);
        cb.on_backend_complete(BackendKind::FreeCad, 42);
        cb.on_backend_error(BackendKind::CadQuery, "boom");
        cb.on_conversion_complete(true);
    }

    #[test]
    fn unimplemented_methods_fall_back_to_noop() {
        let rec = Recorder::default();
        rec.on_conversion_start("part.step");
        rec.on_backend_start(BackendKind::FreeCad);
        rec.on_backend_error(BackendKind::FreeCad, "exit 2");
        rec.on_backend_complete(BackendKind::CadQuery, 10);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start freecad".to_string(), "error freecad: exit 2".to_string()]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_backend_start(BackendKind::CadQuery);
    }
}
