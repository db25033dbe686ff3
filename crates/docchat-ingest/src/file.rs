//! Text extraction from uploaded file bytes.

use docchat_core::{Error, Result};
use tracing::debug;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    PlainText,
    Markdown,
    Unknown,
}

impl FileType {
    /// Detect file type from extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "txt" => Self::PlainText,
            "md" | "mdx" => Self::Markdown,
            _ => Self::Unknown,
        }
    }

    /// Detect from magic bytes first, then the file name.
    pub fn detect(bytes: &[u8], filename: Option<&str>) -> Self {
        if bytes.starts_with(b"%PDF-") {
            return Self::Pdf;
        }
        filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| Self::from_extension(ext))
            .unwrap_or(Self::Unknown)
    }
}

/// Extract plain text from an uploaded file.
pub fn extract_text(bytes: &[u8], filename: Option<&str>) -> Result<String> {
    let text = match FileType::detect(bytes, filename) {
        FileType::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| Error::Ingest(format!("PDF extraction failed: {}", e)))?,
        FileType::PlainText | FileType::Markdown => String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Ingest("File is not valid UTF-8".into()))?,
        FileType::Unknown => {
            return Err(Error::Ingest(format!(
                "Unsupported file type: {}",
                filename.unwrap_or("<unnamed>")
            )))
        }
    };

    debug!("Extracted {} bytes of text", text.len());

    if text.trim().is_empty() {
        return Err(Error::Ingest("No text could be extracted from the file".into()));
    }
    Ok(text)
}
