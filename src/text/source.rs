use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::{Error, Result};

/// Plain text of a document plus what is known about where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// File stem, used as the document id
    pub doc_id: String,
    /// File name
    pub title: String,
    /// Path as given
    pub source: String,
    pub text: String,
}

/// Produces normalised plain text for a document path.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn load(&self, path: &Path) -> Result<SourceDocument>;
}

/// Extensions that are binary containers and need a dedicated converter.
const BINARY_FORMATS: &[&str] = &[
    "pdf", "docx", "doc", "pptx", "xlsx", "png", "jpg", "jpeg", "tiff", "gif",
];

/// Reads UTF-8 text files from disk.
#[derive(Debug, Clone, Default)]
pub struct FileTextSource;

impl FileTextSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextSource for FileTextSource {
    async fn load(&self, path: &Path) -> Result<SourceDocument> {
        let shown = path.display().to_string();
        let fail = |message: String| Error::TextSource {
            path: shown.clone(),
            message,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if BINARY_FORMATS.contains(&extension.as_str()) {
            return Err(fail(format!(
                "'.{}' documents need converting to text first",
                extension
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let raw = String::from_utf8(bytes)
            .map_err(|e| fail(format!("not valid UTF-8 text: {}", e)))?;
        let text = normalize_text(&raw);

        debug!("Loaded {} ({} characters)", shown, text.chars().count());

        let doc_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(shown.as_str())
            .to_string();
        let title = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(shown.as_str())
            .to_string();

        Ok(SourceDocument {
            doc_id,
            title,
            source: shown,
            text,
        })
    }
}

/// CRLF to LF, strip a BOM, trim trailing whitespace per line and overall.
pub fn normalize_text(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
