use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use extract::{BatchRunner, CompletionModel, LoadedSchema, ModelInvocationError};
use ingest::{FileMetadata, IngestSink};
use serde_json::json;
use store::SqliteStore;

struct CannedModel {
    replies: Mutex<VecDeque<String>>,
}

impl CannedModel {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }
}

impl CompletionModel for CannedModel {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _temperature: f32,
    ) -> Result<String, ModelInvocationError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ModelInvocationError::EmptyCompletion)
    }
}

/// Ingest one document per text through the real tables and return the store.
fn seeded_store(texts: &[&str]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    {
        let tables = store.ensure_ingest_tables("docs").unwrap();
        let mut contents = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let file_id = tables
                .record_metadata(&FileMetadata {
                    file_type: "pdf".to_string(),
                    file_name: format!("{i}.pdf"),
                    ingested_at: Utc::now(),
                    checksum: format!("{i:064}"),
                    success: true,
                })
                .unwrap();
            contents.push((file_id, Some(text.to_string())));
        }
        tables.record_contents(&contents).unwrap();
    }
    store
}

async fn run(store: &SqliteStore, schema: serde_json::Value, replies: &[&str]) -> extract::RunSummary {
    let schema = LoadedSchema::from_value(&schema).unwrap();
    store.ensure_results_table("docs_parsed").unwrap();
    let sink = store.result_table("docs_parsed").unwrap();
    let documents = store.query_documents("docs_contents", None).unwrap();

    BatchRunner::new(CannedModel::new(replies), schema, "schema.json")
        .run(&documents, &sink)
        .await
}

#[tokio::test]
async fn object_schema_success_is_persisted() {
    let store = seeded_store(&["Plan Type: HMO"]);
    let schema = json!({
        "properties": {"name": {"type": "string"}, "planType": {"type": "string"}}
    });

    let summary = run(&store, schema, &[r#"{"planType": "HMO"}"#]).await;

    assert_eq!(summary.succeeded, 1);
    let rows = store.query_results("docs_parsed").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].parsed_data, Some(json!({"planType": "HMO"})));
    assert_eq!(rows[0].error_kind, None);
    assert_eq!(rows[0].schema_name, "schema.json");
}

#[tokio::test]
async fn bare_object_for_array_schema_is_shape_mismatch() {
    let store = seeded_store(&["Claim 123 approved"]);
    let schema = json!({"items": {"properties": {"claimId": {"type": "string"}}}});

    let summary = run(&store, schema, &[r#"{"claimId": "123"}"#]).await;

    assert_eq!(summary.shape_mismatches, 1);
    let rows = store.query_results("docs_parsed").unwrap();
    assert_eq!(rows[0].error_kind.as_deref(), Some("SHAPE_MISMATCH"));
    assert_eq!(rows[0].parsed_data, None);
    assert_eq!(rows[0].shape, "array");
}

#[tokio::test]
async fn unparseable_output_keeps_raw_text() {
    let store = seeded_store(&["Plan Type: PPO"]);
    let schema = json!({"properties": {"planType": {"type": "string"}}});

    let summary = run(&store, schema, &["not json"]).await;

    assert_eq!(summary.parse_failures, 1);
    let rows = store.query_results("docs_parsed").unwrap();
    assert_eq!(rows[0].error_kind.as_deref(), Some("PARSE_FAILURE"));
    assert_eq!(rows[0].raw_model_text.as_deref(), Some("not json"));
    assert_eq!(rows[0].parsed_data, None);
}

#[tokio::test]
async fn empty_documents_leave_no_rows() {
    let store = seeded_store(&["", "Plan Type: HMO", "   "]);
    let schema = json!({"properties": {"planType": {"type": "string"}}});

    let summary = run(&store, schema, &[r#"{"planType": "HMO"}"#]).await;

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(store.count_rows("docs_parsed").unwrap(), 1);
}
