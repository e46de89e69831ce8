pub mod batch;
pub mod llm;
pub mod prompt;
pub mod result;
pub mod retry;
pub mod schema;
pub mod validator;

pub use batch::{BatchRunner, ResultSink};
pub use llm::{
    CompletionModel, EXTRACTION_TEMPERATURE, LlmClient, LlmProvider, ModelInvocationError,
    ModelInvoker, OllamaClient, OpenAiClient,
};
pub use prompt::{PromptPair, build_extraction_prompt};
pub use result::{Document, ErrorKind, ExtractionResult, Outcome, RunSummary};
pub use retry::RetryPolicy;
pub use schema::{FieldMapping, LoadedSchema, SchemaError, ShapeTag, default_schema_name};
pub use validator::{ParsedOutcome, validate};
