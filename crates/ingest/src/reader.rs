use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::IngestError;

pub struct PdfReader;

impl PdfReader {
    /// PDF files directly inside `dir` (not recursive), sorted by path.
    pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| IngestError::Io {
                path: dir.display().to_string(),
                source: e.into(),
            })?;

            if entry.file_type().is_file() && is_pdf(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }

    pub async fn read_bytes(path: &Path) -> Result<Vec<u8>, IngestError> {
        tokio::fs::read(path).await.map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Plain text of a PDF, trimmed. Runs the CPU-bound extractor on the
    /// blocking pool; a panic inside the extractor is reported as an error.
    pub async fn extract_text(bytes: Vec<u8>) -> Result<String, IngestError> {
        let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| IngestError::Extraction(format!("extractor aborted: {}", e)))?;

        let text = extracted.map_err(|e| IngestError::Extraction(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}
