//! Sequential batch orchestration: prompt -> invoke -> validate -> persist,
//! one document at a time, with every invoked document leaving exactly one
//! result behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{Instrument, debug, error, info, warn};

use crate::llm::{CompletionModel, ModelInvocationError, ModelInvoker};
use crate::prompt::build_extraction_prompt;
use crate::result::{Document, ErrorKind, ExtractionResult, Outcome, RunSummary};
use crate::retry::RetryPolicy;
use crate::schema::LoadedSchema;
use crate::validator::{ParsedOutcome, describe_shape, validate};

/// Destination for extraction results. Append-only.
pub trait ResultSink {
    /// Persist one result and return its row id.
    fn record(&self, result: &ExtractionResult) -> anyhow::Result<i64>;
}

/// Terminal state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Skipped,
    RecordedSuccess,
    RecordedFailure,
}

pub struct BatchRunner<M> {
    invoker: ModelInvoker<M>,
    schema: LoadedSchema,
    schema_name: String,
    retry: RetryPolicy,
    cancel: Option<Arc<AtomicBool>>,
    run_id: String,
}

impl<M: CompletionModel> BatchRunner<M> {
    pub fn new(model: M, schema: LoadedSchema, schema_name: impl Into<String>) -> Self {
        Self {
            invoker: ModelInvoker::new(model),
            schema,
            schema_name: schema_name.into(),
            retry: RetryPolicy::none(),
            cancel: None,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Retry transient model failures. Shape and parse failures are never retried.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checked before each document; once set, no new document is started.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn invoker(&self) -> &ModelInvoker<M> {
        &self.invoker
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Process every document in order and persist one row per invoked document.
    pub async fn run<S: ResultSink>(&self, documents: &[Document], sink: &S) -> RunSummary {
        let span = tracing::info_span!(
            "extraction_run",
            run_id = %self.run_id,
            schema = %self.schema_name,
            shape = %self.schema.shape,
        );

        async {
            info!(documents = documents.len(), "Starting extraction run");
            let mut summary = RunSummary::default();

            for document in documents {
                if self.is_cancelled() {
                    warn!(
                        remaining = documents.len() - summary.processed - summary.skipped,
                        "Cancellation requested, stopping before next document"
                    );
                    summary.cancelled = true;
                    break;
                }

                self.run_document(document, sink, &mut summary).await;
            }

            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                success_rate = summary.success_rate(),
                "Extraction run finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    async fn run_document<S: ResultSink>(
        &self,
        document: &Document,
        sink: &S,
        summary: &mut RunSummary,
    ) -> DocumentState {
        info!(
            file_id = document.file_id,
            text_len = document.text.len(),
            "Processing document"
        );

        if document.text.trim().is_empty() {
            warn!(file_id = document.file_id, "Skipping document with empty text");
            summary.skipped += 1;
            return DocumentState::Skipped;
        }

        let result = self.extract_document(document).await;
        summary.record(&result);

        match sink.record(&result) {
            Ok(row_id) => debug!(file_id = document.file_id, row_id, "Result persisted"),
            Err(e) => {
                error!(
                    file_id = document.file_id,
                    error = %format!("{e:#}"),
                    "Failed to persist extraction result, result lost"
                );
                summary.persist_failures += 1;
            }
        }

        if result.is_success() {
            DocumentState::RecordedSuccess
        } else {
            DocumentState::RecordedFailure
        }
    }

    /// Build the prompt, call the model and classify its output. Never fails:
    /// every error becomes a failed result.
    pub async fn extract_document(&self, document: &Document) -> ExtractionResult {
        let prompt =
            build_extraction_prompt(&self.schema.fields, self.schema.shape, &document.text);

        let invocation = self
            .retry
            .retry_if(
                "model_completion",
                ModelInvocationError::is_transient,
                || self.invoker.invoke(&prompt),
            )
            .await;

        let raw = match invocation {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    file_id = document.file_id,
                    error = %e,
                    transient = e.is_transient(),
                    "Model invocation failed"
                );
                return self.result(
                    document,
                    Outcome::Failed {
                        kind: ErrorKind::InvocationError,
                        detail: e.to_string(),
                    },
                    None,
                );
            }
        };

        let outcome = match validate(&raw, self.schema.shape) {
            ParsedOutcome::Success(payload) => {
                info!(file_id = document.file_id, "Parsing successful");
                Outcome::Extracted(payload)
            }
            ParsedOutcome::ShapeMismatch(payload) => {
                let detail = format!(
                    "expected {}, model returned {}",
                    self.schema.shape,
                    describe_shape(&payload)
                );
                warn!(file_id = document.file_id, %detail, "Model output has the wrong shape");
                Outcome::Failed {
                    kind: ErrorKind::ShapeMismatch,
                    detail,
                }
            }
            ParsedOutcome::ParseFailure { raw, error } => {
                warn!(
                    file_id = document.file_id,
                    error = %error,
                    raw_output = %raw,
                    "Model output is not valid JSON"
                );
                Outcome::Failed {
                    kind: ErrorKind::ParseFailure,
                    detail: error,
                }
            }
        };

        self.result(document, outcome, Some(raw))
    }

    fn result(
        &self,
        document: &Document,
        outcome: Outcome,
        raw_model_text: Option<String>,
    ) -> ExtractionResult {
        ExtractionResult {
            file_id: document.file_id,
            schema_name: self.schema_name.clone(),
            shape: self.schema.shape,
            outcome,
            raw_model_text,
            run_id: self.run_id.clone(),
        }
    }
}
