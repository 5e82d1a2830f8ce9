//! Conversion input: the uploaded bytes plus the names the caller chose.

use crate::config::MeshTolerance;
use crate::error::ConvertError;
use crate::sanitize::{base_name_from_filename, extension_of};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// CAD formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadFormat {
    /// Already a mesh; conversion is skipped.
    Stl,
    /// ISO 10303 (`.step` / `.stp`).
    Step,
    /// IGES (`.iges` / `.igs`).
    Iges,
    /// Fusion 360 archive (`.f3z`). Accepted, but only succeeds if a backend can read it.
    F3z,
}

impl CadFormat {
    /// Every accepted extension, lowercase with the leading dot.
    pub const EXTENSIONS: [&'static str; 6] = [".stl", ".step", ".stp", ".iges", ".igs", ".f3z"];

    /// Map a lowercase extension (with leading dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".stl" => Some(CadFormat::Stl),
            ".step" | ".stp" => Some(CadFormat::Step),
            ".iges" | ".igs" => Some(CadFormat::Iges),
            ".f3z" => Some(CadFormat::F3z),
            _ => None,
        }
    }

    /// `true` when the format is already the conversion target.
    pub fn is_target(&self) -> bool {
        matches!(self, CadFormat::Stl)
    }
}

/// One file to convert.
///
/// Immutable once built: the orchestrator only borrows it.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    bytes: Vec<u8>,
    original_filename: String,
    output_base_name: String,
    tolerance: Option<MeshTolerance>,
}

impl ConversionRequest {
    /// Build a request from in-memory bytes.
    ///
    /// `original_filename` is used only for its extension; `output_base_name`
    /// becomes the artifact name (`<base>.stl`).
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        original_filename: impl Into<String>,
        output_base_name: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            original_filename: original_filename.into(),
            output_base_name: output_base_name.into(),
            tolerance: None,
        }
    }

    /// Read a request from disk, naming the artifact after the file stem.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ConvertError::InputReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = base_name_from_filename(&filename);
        Ok(Self::new(bytes, filename, base))
    }

    /// Override the configured meshing fidelity for this request only.
    pub fn with_tolerance(mut self, tolerance: MeshTolerance) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn output_base_name(&self) -> &str {
        &self.output_base_name
    }

    pub fn tolerance(&self) -> Option<MeshTolerance> {
        self.tolerance
    }

    /// Lowercased extension of the original filename, e.g. `".step"`.
    pub fn extension(&self) -> String {
        extension_of(&self.original_filename)
    }

    /// Resolve the input format, rejecting unknown extensions.
    pub fn format(&self) -> Result<CadFormat, ConvertError> {
        let ext = self.extension();
        CadFormat::from_extension(&ext).ok_or(ConvertError::UnsupportedFormat { extension: ext })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        let r = ConversionRequest::new(vec![1], "Part.STP", "part");
        assert_eq!(r.extension(), ".stp");
        assert_eq!(r.format().unwrap(), CadFormat::Step);
    }

    #[test]
    fn every_listed_extension_resolves() {
        for ext in CadFormat::EXTENSIONS {
            assert!(CadFormat::from_extension(ext).is_some(), "{ext}");
        }
        assert!(CadFormat::from_extension(".stl").unwrap().is_target());
        assert!(!CadFormat::from_extension(".igs").unwrap().is_target());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let r = ConversionRequest::new(vec![1], "drawing.dwg", "drawing");
        match r.format() {
            Err(ConvertError::UnsupportedFormat { extension }) => assert_eq!(extension, ".dwg"),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
        let bare = ConversionRequest::new(vec![1], "noext", "noext");
        assert!(bare.format().is_err());
    }

    #[tokio::test]
    async fn from_path_names_artifact_after_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Gear Box.STEP");
        tokio::fs::write(&path, b"ISO-10303-21;").await.unwrap();

        let r = ConversionRequest::from_path(&path).await.unwrap();
        assert_eq!(r.output_base_name(), "gear-box");
        assert_eq!(r.original_filename(), "Gear Box.STEP");
        assert_eq!(r.bytes(), b"ISO-10303-21;");
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        let err = ConversionRequest::from_path("/definitely/not/here.step")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::InputReadFailed { .. }));
    }
}
