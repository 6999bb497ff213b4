//! Content extraction for indexable files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no text extractor for .{0} files")]
    Unsupported(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Turns a file on disk into searchable text.
///
/// Only called for extensions in the library's indexable set. Failures are
/// not fatal to a sync run; the document is indexed with empty text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path, extension: &str) -> Result<String, ExtractError>;
}

/// Formats whose bytes are the text.
const TEXT_TYPES: &[&str] = &[
    "adoc", "bib", "csv", "htm", "html", "json", "md", "rst", "svg", "tex", "toml", "txt", "xml",
    "yaml", "yml",
];

/// Formats that are indexed by metadata only.
const METADATA_ONLY_TYPES: &[&str] = &["bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp"];

/// Reads text formats directly, indexes images without text, and reports
/// everything else (e.g. PDF) as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path, extension: &str) -> Result<String, ExtractError> {
        let ext = extension.to_ascii_lowercase();

        if METADATA_ONLY_TYPES.contains(&ext.as_str()) {
            return Ok(String::new());
        }

        if !TEXT_TYPES.contains(&ext.as_str()) {
            return Err(ExtractError::Unsupported(ext));
        }

        let bytes = fs::read(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Cuts `text` down to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_text(mut text: String, max_bytes: usize) -> String {
    if text.len() > max_bytes {
        let mut end = max_bytes;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
