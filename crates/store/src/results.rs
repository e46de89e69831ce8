use anyhow::Context;
use extract::{ExtractionResult, ResultSink};
use rusqlite::params;

use crate::{SqliteStore, StoreError, TableStatus, validate_identifier};

const RESULT_COLUMNS: &str = "id INTEGER PRIMARY KEY AUTOINCREMENT,
     file_id INTEGER NOT NULL,
     schema_name TEXT NOT NULL,
     shape TEXT NOT NULL,
     parsed_data TEXT,
     error_kind TEXT,
     error_detail TEXT,
     raw_model_text TEXT,
     run_id TEXT NOT NULL,
     parsing_timestamp TEXT DEFAULT CURRENT_TIMESTAMP";

/// A persisted extraction row as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub id: i64,
    pub file_id: i64,
    pub schema_name: String,
    pub shape: String,
    pub parsed_data: Option<serde_json::Value>,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub raw_model_text: Option<String>,
    pub run_id: String,
}

/// Extraction destination table; the orchestrator's sink.
pub struct ResultTable<'a> {
    store: &'a SqliteStore,
    name: String,
}

impl SqliteStore {
    pub fn ensure_results_table(&self, name: &str) -> Result<TableStatus, StoreError> {
        self.ensure_table(name, RESULT_COLUMNS)
    }

    pub fn result_table(&self, name: &str) -> Result<ResultTable<'_>, StoreError> {
        Ok(ResultTable {
            store: self,
            name: validate_identifier(name)?.to_string(),
        })
    }

    /// Append one result. Payload and error columns are mutually exclusive.
    pub fn insert_result(&self, table: &str, result: &ExtractionResult) -> Result<i64, StoreError> {
        let table = validate_identifier(table)?;
        let parsed_data = result.payload().map(serde_json::to_string).transpose()?;

        self.conn.execute(
            &format!(
                "INSERT INTO {} (file_id, schema_name, shape, parsed_data, error_kind,
                                 error_detail, raw_model_text, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                table
            ),
            params![
                result.file_id,
                result.schema_name,
                result.shape.as_str(),
                parsed_data,
                result.error_kind().map(|kind| kind.as_str()),
                result.error_detail(),
                result.raw_model_text,
                result.run_id,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn query_results(&self, table: &str) -> Result<Vec<StoredResult>, StoreError> {
        let table = validate_identifier(table)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, file_id, schema_name, shape, parsed_data, error_kind,
                    error_detail, raw_model_text, run_id
             FROM {} ORDER BY id",
            table
        ))?;

        let rows = stmt.query_map([], |row| {
            let parsed_data: Option<String> = row.get(4)?;
            Ok((
                StoredResult {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    schema_name: row.get(2)?,
                    shape: row.get(3)?,
                    parsed_data: None,
                    error_kind: row.get(5)?,
                    error_detail: row.get(6)?,
                    raw_model_text: row.get(7)?,
                    run_id: row.get(8)?,
                },
                parsed_data,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (mut result, parsed_data) = row?;
            result.parsed_data = parsed_data
                .map(|json| serde_json::from_str(&json))
                .transpose()?;
            results.push(result);
        }
        Ok(results)
    }
}

impl ResultTable<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ResultSink for ResultTable<'_> {
    fn record(&self, result: &ExtractionResult) -> anyhow::Result<i64> {
        self.store
            .insert_result(&self.name, result)
            .with_context(|| {
                format!(
                    "Failed to insert result for file {} into {}",
                    result.file_id, self.name
                )
            })
    }
}
