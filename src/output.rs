//! Conversion results.

use crate::error::BackendFailure;
use crate::pipeline::backend::BackendKind;
use serde::{Deserialize, Serialize};

/// MIME type declared for every produced artifact.
pub const STL_CONTENT_TYPE: &str = "model/stl";

/// A finished conversion: the STL bytes and how they were obtained.
///
/// Only the orchestrator constructs this, either from a verified on-disk
/// artifact or from an input that already was STL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ConversionResult {
    /// STL bytes. Omitted from serialised metadata.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Artifact filename, `<base>.stl`.
    pub filename: String,
    /// Always [`STL_CONTENT_TYPE`].
    pub content_type: String,
    /// `true` when the input was already STL and no backend ran.
    pub skipped: bool,
    /// Backend that produced the artifact. `None` when skipped.
    pub backend: Option<BackendKind>,
    /// Earlier backends that failed before `backend` succeeded.
    pub fallbacks: Vec<BackendFailure>,
    /// Wall-clock time of the whole request in milliseconds.
    pub duration_ms: u64,
}

impl ConversionResult {
    pub(crate) fn skipped(bytes: Vec<u8>, filename: String) -> Self {
        Self {
            bytes,
            filename,
            content_type: STL_CONTENT_TYPE.to_string(),
            skipped: true,
            backend: None,
            fallbacks: Vec::new(),
            duration_ms: 0,
        }
    }

    pub(crate) fn converted(
        artifact: crate::pipeline::backend::VerifiedArtifact,
        backend: BackendKind,
        fallbacks: Vec<BackendFailure>,
        duration_ms: u64,
    ) -> Self {
        Self {
            bytes: artifact.bytes,
            filename: artifact.filename,
            content_type: STL_CONTENT_TYPE.to_string(),
            skipped: false,
            backend: Some(backend),
            fallbacks,
            duration_ms,
        }
    }

    /// Artifact size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Availability of one backend under a given configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub backend: BackendKind,
    pub available: bool,
    /// Setting that enables the backend, e.g. `FREECAD_CMD`.
    pub setting: String,
    /// Command line prefix the backend will run, when available.
    pub command: Option<String>,
}
