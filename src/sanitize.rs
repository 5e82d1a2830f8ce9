//! Filename sanitising for staged inputs and artifact names.
//!
//! Workspace files and storage object keys are built from user-supplied
//! filenames, so every base name passes through [`safe_filename_segment`]
//! first: NFKD-decomposed with accents dropped, then lowercase ASCII,
//! digits, `.` and `-` only.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Fallback used when nothing safe survives sanitising.
pub const FALLBACK_SEGMENT: &str = "upload";

static UNSAFE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9.]+").unwrap());
static DOT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());

/// Reduce `input` to a filesystem- and URL-safe token.
///
/// ```rust
/// use cad2stl::sanitize::safe_filename_segment;
///
/// assert_eq!(safe_filename_segment("Bracket (rev B)"), "bracket-rev-b");
/// assert_eq!(safe_filename_segment("Pièce_Moteur"), "piece-moteur");
/// assert_eq!(safe_filename_segment("???"), "upload");
/// ```
pub fn safe_filename_segment(input: &str) -> String {
    let folded: String = input.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let lowered = folded.to_lowercase();
    let dashed = UNSAFE_RUN.replace_all(&lowered, "-");
    let dotted = DOT_RUN.replace_all(&dashed, ".");
    let trimmed = dotted.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        FALLBACK_SEGMENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitised stem of a filename, e.g. `"My Part.STEP"` → `"my-part"`.
pub fn base_name_from_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    safe_filename_segment(&stem)
}

/// Lowercased extension including the leading dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Combining diacritical marks left behind by compatibility decomposition.
fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036f}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_safe_tokens_unchanged() {
        assert_eq!(safe_filename_segment("part-01"), "part-01");
        assert_eq!(safe_filename_segment("v1.2"), "v1.2");
    }

    #[test]
    fn is_idempotent() {
        for input in ["Gear Box", "ÉCROU M8", "a/../b", "..hidden", "x__y"] {
            let once = safe_filename_segment(input);
            assert_eq!(safe_filename_segment(&once), once, "input: {input}");
        }
    }

    #[test]
    fn strips_path_traversal() {
        let s = safe_filename_segment("../../etc/passwd");
        assert!(!s.contains('/'));
        assert!(!s.contains(".."));
        assert!(!s.starts_with('.'));
    }

    #[test]
    fn decomposed_accents_are_dropped() {
        assert_eq!(safe_filename_segment("e\u{0301}tau"), "etau");
    }

    #[test]
    fn compatibility_decomposition_folds_central_european_names() {
        assert_eq!(safe_filename_segment("Šroub"), "sroub");
        assert_eq!(safe_filename_segment("Žárovka"), "zarovka");
        assert_eq!(safe_filename_segment("ﬁlter"), "filter");
        assert_eq!(safe_filename_segment("Łożysko"), "ozysko");
        assert_eq!(safe_filename_segment("Ｐａｒｔ２"), "part2");
    }

    #[test]
    fn base_name_and_extension() {
        assert_eq!(base_name_from_filename("My Part.STEP"), "my-part");
        assert_eq!(base_name_from_filename(".step"), "step");
        assert_eq!(extension_of("My Part.STEP"), ".step");
        assert_eq!(extension_of("README"), "");
    }
}
