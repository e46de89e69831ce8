pub mod reader;

pub use reader::PdfReader;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("text extraction failed: {0}")]
    Extraction(String),
}

/// SHA-256 of the file contents, hex encoded.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Metadata row for one ingested file.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FileMetadata {
    pub file_type: String,
    pub file_name: String,
    pub ingested_at: DateTime<Utc>,
    pub checksum: String,
    pub success: bool,
}

/// A file after checksum and text extraction. `text` is `None` when
/// extraction failed; the failure is kept in `error`.
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub metadata: FileMetadata,
    pub text: Option<String>,
    pub error: Option<String>,
}

/// Destination for ingested files (metadata and contents tables).
pub trait IngestSink {
    fn is_ingested(&self, checksum: &str) -> anyhow::Result<bool>;

    /// Insert one metadata row and return its generated file id.
    fn record_metadata(&self, metadata: &FileMetadata) -> anyhow::Result<i64>;

    /// Insert all content rows in one batch.
    fn record_contents(&self, contents: &[(i64, Option<String>)]) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub found: usize,
    pub ingested: usize,
    pub extraction_failures: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub contents_written: usize,
    /// Stopped early on request; files after the cut were never read.
    pub cancelled: bool,
}

/// Extract one PDF whose bytes are already read. Extraction errors are
/// captured in the result so the file is still recorded.
pub async fn ingest_bytes(path: &Path, bytes: Vec<u8>, checksum: String) -> IngestedFile {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let (text, error) = match PdfReader::extract_text(bytes).await {
        Ok(text) => (Some(text), None),
        Err(e) => {
            error!(file = %file_name, error = %e, "Failed to extract text");
            (None, Some(e.to_string()))
        }
    };

    IngestedFile {
        metadata: FileMetadata {
            file_type: "pdf".to_string(),
            file_name,
            ingested_at: Utc::now(),
            checksum,
            success: error.is_none(),
        },
        text,
        error,
    }
}

/// Ingest the given files: one metadata row per file as it is processed,
/// then all contents in a single bulk insert. Per-file problems are logged
/// and counted, never fatal. `cancel` is checked before each file; contents
/// of files already recorded are still written.
pub async fn bulk_ingest<S: IngestSink>(
    files: &[PathBuf],
    sink: &S,
    cancel: &AtomicBool,
) -> IngestSummary {
    let mut summary = IngestSummary {
        found: files.len(),
        ..Default::default()
    };
    let mut contents = Vec::new();

    for (index, path) in files.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            warn!(
                remaining = files.len() - index,
                "Cancellation requested, stopping before next file"
            );
            summary.cancelled = true;
            break;
        }

        let bytes = match PdfReader::read_bytes(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Unexpected error processing file");
                summary.errors += 1;
                continue;
            }
        };
        let checksum = compute_checksum(&bytes);

        match sink.is_ingested(&checksum) {
            Ok(true) => {
                warn!(file = %path.display(), %checksum, "File already ingested, skipping");
                summary.duplicates += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "Duplicate check failed, ingesting anyway"),
        }

        let file = ingest_bytes(path, bytes, checksum).await;

        match sink.record_metadata(&file.metadata) {
            Ok(file_id) => {
                info!(file = %file.metadata.file_name, file_id, "Ingested file");
                summary.ingested += 1;
                if !file.metadata.success {
                    summary.extraction_failures += 1;
                }
                contents.push((file_id, file.text));
            }
            Err(e) => {
                error!(
                    file = %file.metadata.file_name,
                    error = %format!("{e:#}"),
                    "Failed to record file metadata"
                );
                summary.errors += 1;
            }
        }
    }

    if !contents.is_empty() {
        match sink.record_contents(&contents) {
            Ok(written) => {
                info!(rows = written, "Inserted file contents");
                summary.contents_written = written;
            }
            Err(e) => error!(error = %format!("{e:#}"), "Bulk insert of file contents failed"),
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemorySink {
        known: Vec<String>,
        metadata: RefCell<Vec<FileMetadata>>,
        contents: RefCell<Vec<(i64, Option<String>)>>,
    }

    impl IngestSink for MemorySink {
        fn is_ingested(&self, checksum: &str) -> anyhow::Result<bool> {
            Ok(self.known.iter().any(|c| c == checksum))
        }

        fn record_metadata(&self, metadata: &FileMetadata) -> anyhow::Result<i64> {
            let mut rows = self.metadata.borrow_mut();
            rows.push(metadata.clone());
            Ok(rows.len() as i64)
        }

        fn record_contents(&self, contents: &[(i64, Option<String>)]) -> anyhow::Result<usize> {
            self.contents.borrow_mut().extend_from_slice(contents);
            Ok(contents.len())
        }
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            compute_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_failed_extraction_is_still_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not really a pdf").unwrap();

        let sink = MemorySink::default();
        let summary = bulk_ingest(&[path], &sink, &AtomicBool::new(false)).await;

        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.extraction_failures, 1);
        let metadata = sink.metadata.borrow();
        assert_eq!(metadata[0].file_name, "broken.pdf");
        assert!(!metadata[0].success);
        assert_eq!(metadata[0].checksum.len(), 64);
        assert_eq!(*sink.contents.borrow(), vec![(1, None)]);
    }

    #[tokio::test]
    async fn test_duplicates_and_missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.pdf");
        std::fs::write(&path, b"same bytes").unwrap();

        let sink = MemorySink {
            known: vec![compute_checksum(b"same bytes")],
            ..Default::default()
        };
        let summary = bulk_ingest(
            &[path, dir.path().join("gone.pdf")],
            &sink,
            &AtomicBool::new(false),
        )
        .await;

        assert_eq!(summary.found, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.errors, 1);
        assert!(sink.metadata.borrow().is_empty());
        assert!(sink.contents.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_preset_cancel_flag_stops_before_first_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.pdf");
        let second = dir.path().join("b.pdf");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let sink = MemorySink::default();
        let summary = bulk_ingest(&[first, second], &sink, &AtomicBool::new(true)).await;

        assert!(summary.cancelled);
        assert_eq!(summary.found, 2);
        assert_eq!(summary.ingested, 0);
        assert!(sink.metadata.borrow().is_empty());
        assert!(sink.contents.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_recorded_contents() {
        struct CancellingSink<'a> {
            inner: MemorySink,
            cancel: &'a AtomicBool,
        }

        impl IngestSink for CancellingSink<'_> {
            fn is_ingested(&self, checksum: &str) -> anyhow::Result<bool> {
                self.inner.is_ingested(checksum)
            }

            fn record_metadata(&self, metadata: &FileMetadata) -> anyhow::Result<i64> {
                self.cancel.store(true, Ordering::Relaxed);
                self.inner.record_metadata(metadata)
            }

            fn record_contents(&self, contents: &[(i64, Option<String>)]) -> anyhow::Result<usize> {
                self.inner.record_contents(contents)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.pdf");
        let second = dir.path().join("b.pdf");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let cancel = AtomicBool::new(false);
        let sink = CancellingSink {
            inner: MemorySink::default(),
            cancel: &cancel,
        };
        let summary = bulk_ingest(&[first, second], &sink, &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.ingested, 1);
        assert_eq!(sink.inner.metadata.borrow()[0].file_name, "a.pdf");
        assert_eq!(*sink.inner.contents.borrow(), vec![(1, None)]);
    }
}
