//! Document loading: turns the configured source file into ordered text segments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lopdf::Document;
use thiserror::Error;
use tracing::{debug, warn};

/// Raw text of one source unit (a PDF page, or the whole file for plain text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Document the text came from.
    pub source: PathBuf,
    /// 1-based page number inside the source.
    pub page: u32,
    /// Extracted text.
    pub text: String,
}

/// Failure to turn the source file into text.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file is missing or unreadable.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The bytes could not be parsed as the expected format.
    #[error("failed to parse {path:?}: {reason}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

/// Source of document text.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Reads the document and returns its segments in document order.
    async fn load(&self, path: &Path) -> Result<Vec<Segment>, LoadError>;
}

/// PDF loader producing one segment per page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Segment>, LoadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_pages(&owned, &bytes))
            .await
            .map_err(|err| LoadError::Parse {
                path: path.to_path_buf(),
                reason: format!("pdf extraction task failed: {err}"),
            })?
    }
}

fn extract_pages(path: &Path, bytes: &[u8]) -> Result<Vec<Segment>, LoadError> {
    let doc = Document::load_mem(bytes).map_err(|err| LoadError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let pages = doc.get_pages();
    let mut segments = Vec::with_capacity(pages.len());
    for page in pages.keys().copied() {
        match doc.extract_text(&[page]) {
            Ok(text) => segments.push(Segment {
                source: path.to_path_buf(),
                page,
                text,
            }),
            // One unreadable page should not discard the rest of the document.
            Err(err) => warn!("skipping page {} of {:?}: {}", page, path, err),
        }
    }
    debug!("extracted {} page(s) from {:?}", segments.len(), path);
    Ok(segments)
}

/// Plain UTF-8 loader producing a single segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Segment>, LoadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|err| LoadError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(vec![Segment {
            source: path.to_path_buf(),
            page: 1,
            text,
        }])
    }
}

/// Loader chosen by file extension: `.pdf` goes through [`PdfLoader`], anything else is read as text.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoLoader;

#[async_trait]
impl DocumentLoader for AutoLoader {
    async fn load(&self, path: &Path) -> Result<Vec<Segment>, LoadError> {
        if is_pdf(path) {
            PdfLoader.load(path).await
        } else {
            TextLoader.load(path).await
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = AutoLoader
            .load(Path::new("/definitely/not/here.pdf"))
            .await
            .expect_err("missing file");
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[tokio::test]
    async fn garbage_pdf_is_parse_error() {
        let mut file = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .expect("temp file");
        file.write_all(b"this is not a pdf").expect("write");
        let err = AutoLoader.load(file.path()).await.expect_err("bad pdf");
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[tokio::test]
    async fn text_file_is_single_segment() {
        let mut file = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile()
            .expect("temp file");
        file.write_all("The boiling point of water is 100°C.".as_bytes())
            .expect("write");
        let segments = AutoLoader.load(file.path()).await.expect("load");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].page, 1);
        assert_eq!(segments[0].text, "The boiling point of water is 100°C.");
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(is_pdf(Path::new("report.PDF")));
        assert!(!is_pdf(Path::new("notes.txt")));
    }
}
