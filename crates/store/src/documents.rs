use anyhow::Context;
use extract::Document;
use ingest::{FileMetadata, IngestSink};
use rusqlite::params;

use crate::{SqliteStore, StoreError, validate_identifier};

/// The `{base}_metadata` / `{base}_contents` pair written by PDF ingestion.
pub struct IngestTables<'a> {
    store: &'a SqliteStore,
    pub metadata: String,
    pub contents: String,
}

impl SqliteStore {
    pub fn ensure_ingest_tables(&self, base: &str) -> Result<IngestTables<'_>, StoreError> {
        let metadata = validate_identifier(&format!("{}_metadata", base))?.to_string();
        let contents = validate_identifier(&format!("{}_contents", base))?.to_string();

        self.ensure_table(
            &metadata,
            "id INTEGER PRIMARY KEY AUTOINCREMENT,
             file_type TEXT NOT NULL,
             file_name TEXT NOT NULL,
             ingestion_time_utc TEXT NOT NULL,
             checksum TEXT NOT NULL,
             success INTEGER NOT NULL",
        )?;
        self.ensure_table(
            &contents,
            &format!(
                "id INTEGER PRIMARY KEY AUTOINCREMENT,
                 file_id INTEGER NOT NULL REFERENCES {}(id),
                 text_content TEXT",
                metadata
            ),
        )?;

        Ok(IngestTables {
            store: self,
            metadata,
            contents,
        })
    }

    /// `(file_id, text_content)` rows from `table`. With a non-zero `sample`,
    /// a random subset of that size; `Some(0)` reads every row. Missing text
    /// comes back empty.
    pub fn query_documents(
        &self,
        table: &str,
        sample: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let table = validate_identifier(table)?;
        let base = format!(
            "SELECT file_id, COALESCE(text_content, '') FROM {}",
            table
        );

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Document> {
            Ok(Document {
                file_id: row.get(0)?,
                text: row.get(1)?,
            })
        };

        let documents = match sample.filter(|&n| n > 0) {
            Some(n) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} ORDER BY RANDOM() LIMIT ?1", base))?;
                stmt.query_map(params![n as i64], map_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!("{} ORDER BY file_id", base))?;
                stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(documents)
    }
}

impl IngestTables<'_> {
    pub fn checksum_exists(&self, checksum: &str) -> Result<bool, StoreError> {
        let count: i64 = self.store.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE checksum = ?1 AND success = 1",
                self.metadata
            ),
            params![checksum],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_metadata(&self, metadata: &FileMetadata) -> Result<i64, StoreError> {
        self.store.conn.execute(
            &format!(
                "INSERT INTO {} (file_type, file_name, ingestion_time_utc, checksum, success)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.metadata
            ),
            params![
                metadata.file_type,
                metadata.file_name,
                metadata.ingested_at,
                metadata.checksum,
                metadata.success,
            ],
        )?;
        Ok(self.store.conn.last_insert_rowid())
    }

    /// Insert all rows in one transaction; nothing is written if any row fails.
    pub fn insert_contents(&self, rows: &[(i64, Option<String>)]) -> Result<usize, StoreError> {
        let tx = self.store.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (file_id, text_content) VALUES (?1, ?2)",
                self.contents
            ))?;
            for (file_id, text) in rows {
                stmt.execute(params![file_id, text])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }
}

impl IngestSink for IngestTables<'_> {
    fn is_ingested(&self, checksum: &str) -> anyhow::Result<bool> {
        self.checksum_exists(checksum)
            .with_context(|| format!("Failed to look up checksum in {}", self.metadata))
    }

    fn record_metadata(&self, metadata: &FileMetadata) -> anyhow::Result<i64> {
        self.insert_metadata(metadata)
            .with_context(|| format!("Failed to insert into {}", self.metadata))
    }

    fn record_contents(&self, contents: &[(i64, Option<String>)]) -> anyhow::Result<usize> {
        self.insert_contents(contents)
            .with_context(|| format!("Failed to bulk insert into {}", self.contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(name: &str, checksum: &str, success: bool) -> FileMetadata {
        FileMetadata {
            file_type: "pdf".to_string(),
            file_name: name.to_string(),
            ingested_at: Utc::now(),
            checksum: checksum.to_string(),
            success,
        }
    }

    #[test]
    fn test_ingest_tables_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tables = store.ensure_ingest_tables("healthcare_docs").unwrap();
        assert_eq!(tables.metadata, "healthcare_docs_metadata");
        assert_eq!(tables.contents, "healthcare_docs_contents");

        let a = tables.insert_metadata(&metadata("a.pdf", "aaa", true)).unwrap();
        let b = tables.insert_metadata(&metadata("b.pdf", "bbb", false)).unwrap();
        tables
            .insert_contents(&[(a, Some("Plan Type: HMO".to_string())), (b, None)])
            .unwrap();

        let docs = store.query_documents("healthcare_docs_contents", None).unwrap();
        assert_eq!(
            docs,
            vec![
                Document { file_id: a, text: "Plan Type: HMO".to_string() },
                Document { file_id: b, text: String::new() },
            ]
        );
    }

    #[test]
    fn test_checksum_only_counts_successful_ingests() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tables = store.ensure_ingest_tables("docs").unwrap();
        tables.insert_metadata(&metadata("ok.pdf", "good", true)).unwrap();
        tables.insert_metadata(&metadata("bad.pdf", "broken", false)).unwrap();

        assert!(tables.checksum_exists("good").unwrap());
        assert!(!tables.checksum_exists("broken").unwrap());
        assert!(!tables.checksum_exists("unknown").unwrap());
    }

    #[test]
    fn test_contents_insert_is_atomic() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tables = store.ensure_ingest_tables("docs").unwrap();
        let id = tables.insert_metadata(&metadata("a.pdf", "a", true)).unwrap();

        // 999 has no metadata row, so the foreign key rejects the batch.
        let result = tables.insert_contents(&[(id, Some("text".to_string())), (999, None)]);

        assert!(result.is_err());
        assert_eq!(store.count_rows("docs_contents").unwrap(), 0);
    }

    #[test]
    fn test_sampled_query() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tables = store.ensure_ingest_tables("docs").unwrap();
        let rows: Vec<(i64, Option<String>)> = (0..10)
            .map(|i| {
                let id = tables
                    .insert_metadata(&metadata(&format!("{i}.pdf"), &i.to_string(), true))
                    .unwrap();
                (id, Some(format!("text {i}")))
            })
            .collect();
        tables.insert_contents(&rows).unwrap();

        assert_eq!(store.query_documents("docs_contents", Some(3)).unwrap().len(), 3);
        assert_eq!(store.query_documents("docs_contents", Some(50)).unwrap().len(), 10);
        assert_eq!(store.query_documents("docs_contents", None).unwrap().len(), 10);
        assert_eq!(store.query_documents("docs_contents", Some(0)).unwrap().len(), 10);
    }

    #[test]
    fn test_invalid_base_name_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.ensure_ingest_tables("docs; --"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
