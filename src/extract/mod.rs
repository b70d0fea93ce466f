//! Format-dispatched text extraction.
//!
//! Dispatch is on the lowercased file extension (including the dot).
//! Textual inputs have a leading UTF-8 BOM stripped before any parsing.
//! Unknown extensions are read as plaintext.

mod binary;
mod html;
mod json;
mod markdown;

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::AppError;

/// Extraction result: text body plus optional structured companions.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    /// YAML frontmatter mapping, for markdown documents that carry one.
    pub frontmatter: Option<Map<String, Value>>,
    /// Parsed top-level object, for JSON documents.
    pub data: Option<Map<String, Value>>,
}

impl ExtractedText {
    pub fn plain(text: String) -> Self {
        Self { text, frontmatter: None, data: None }
    }
}

/// Lowercased extension of `path` including the leading dot, or an empty
/// string when the file has none.
pub fn extension_of(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}", ext.to_lowercase()),
        None => String::new(),
    }
}

/// Extract text (and optional structured data) from the file at `path`.
pub fn extract(path: &Path) -> Result<ExtractedText, AppError> {
    match extension_of(path).as_str() {
        ".md" | ".markdown" => Ok(markdown::extract(&read_text(path)?)),
        ".txt" | ".text" => Ok(ExtractedText::plain(read_text(path)?)),
        ".json" => json::extract(&read_text(path)?),
        ".html" | ".htm" => Ok(html::extract(&read_text(path)?)),
        ".pdf" => binary::extract_pdf(path),
        ".docx" => binary::extract_docx(path),
        _ => Ok(ExtractedText::plain(read_text(path)?)),
    }
}

/// Read a file as UTF-8 text with the BOM stripped. Invalid sequences are
/// replaced rather than failing the whole file.
fn read_text(path: &Path) -> Result<String, AppError> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::Extract(format!("read {}: {e}", path.display())))?;
    Ok(strip_bom(&String::from_utf8_lossy(&bytes)).to_string())
}

/// Drop a leading UTF-8 BOM, if present.
pub fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(extension_of(Path::new("/w/Readme.MD")), ".md");
        assert_eq!(extension_of(Path::new("/w/notes.txt")), ".txt");
        assert_eq!(extension_of(Path::new("/w/Makefile")), "");
    }

    #[test]
    fn strip_bom_only_removes_leading() {
        assert_eq!(strip_bom("\u{feff}hello"), "hello");
        assert_eq!(strip_bom("hello\u{feff}"), "hello\u{feff}");
        assert_eq!(strip_bom("plain"), "plain");
    }

    #[test]
    fn unknown_extension_reads_as_plaintext() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("data.csv");
        fs::write(&file, "a,b\n1,2\n").expect("write");

        let out = extract(&file).expect("extract");
        assert_eq!(out.text, "a,b\n1,2\n");
        assert!(out.frontmatter.is_none());
        assert!(out.data.is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(extract(Path::new("/definitely/not/here.txt")).is_err());
    }

    #[test]
    fn bom_stripped_from_text_file() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("a.txt");
        fs::write(&file, "\u{feff}hello").expect("write");
        assert_eq!(extract(&file).expect("extract").text, "hello");
    }
}
