//! Text extraction from attached documents.
//!
//! Only plain-text formats are handled in-process; richer formats (PDF, DOCX,
//! spreadsheets) sit behind the [`DocumentExtractor`] seam so a converter
//! service can be plugged in without touching the ingest or retrieval code.

use async_trait::async_trait;

/// Extensions the built-in extractor accepts.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "log"];

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract plain text from a document.
    ///
    /// Returns `None` for unsupported formats. `Some` with empty or
    /// whitespace-only text means the format was recognized but nothing usable
    /// was inside; callers decide whether that aborts (ingest) or just warns
    /// (chat attachments).
    async fn extract(&self, file_name: &str, bytes: &[u8]) -> Option<String>;
}

/// Extractor for plain-text files. Invalid UTF-8 is replaced rather than
/// rejected; half-readable exports still carry searchable content.
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    async fn extract(&self, file_name: &str, bytes: &[u8]) -> Option<String> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())?;
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}
