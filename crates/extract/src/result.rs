use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::schema::ShapeTag;

/// A document handed to the extraction stage. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub file_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvocationError,
    ShapeMismatch,
    ParseFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvocationError => "INVOCATION_ERROR",
            ErrorKind::ShapeMismatch => "SHAPE_MISMATCH",
            ErrorKind::ParseFailure => "PARSE_FAILURE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either a usable payload or a classified failure, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Extracted(Value),
    Failed { kind: ErrorKind, detail: String },
}

/// One document processed against one schema. Persisted once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub file_id: i64,
    pub schema_name: String,
    pub shape: ShapeTag,
    pub outcome: Outcome,
    /// Absent only when the model call itself failed.
    pub raw_model_text: Option<String>,
    pub run_id: String,
}

impl ExtractionResult {
    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Extracted(payload) => Some(payload),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Extracted(_) => None,
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Extracted(_) => None,
            Outcome::Failed { detail, .. } => Some(detail),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Extracted(_))
    }
}

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Documents that reached the model.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub invocation_errors: usize,
    pub shape_mismatches: usize,
    pub parse_failures: usize,
    /// Results that could not be written to the store and are lost.
    pub persist_failures: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn record(&mut self, result: &ExtractionResult) {
        self.processed += 1;
        match result.error_kind() {
            None => self.succeeded += 1,
            Some(kind) => {
                self.failed += 1;
                match kind {
                    ErrorKind::InvocationError => self.invocation_errors += 1,
                    ErrorKind::ShapeMismatch => self.shape_mismatches += 1,
                    ErrorKind::ParseFailure => self.parse_failures += 1,
                }
            }
        }
    }

    /// Percentage of processed documents that succeeded; 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.processed as f64 * 100.0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processing Summary:")?;
        writeln!(f, "  Files processed: {}", self.processed)?;
        writeln!(f, "  Successful parses: {}", self.succeeded)?;
        writeln!(f, "  Failed parses: {}", self.failed)?;
        if self.failed > 0 {
            writeln!(
                f,
                "    invocation errors: {}, shape mismatches: {}, parse failures: {}",
                self.invocation_errors, self.shape_mismatches, self.parse_failures
            )?;
        }
        writeln!(f, "  Skipped (empty text): {}", self.skipped)?;
        if self.persist_failures > 0 {
            writeln!(f, "  Results lost on insert: {}", self.persist_failures)?;
        }
        if self.cancelled {
            writeln!(f, "  Run cancelled before all documents were visited")?;
        }
        write!(f, "  Success rate: {:.1}%", self.success_rate())
    }
}
