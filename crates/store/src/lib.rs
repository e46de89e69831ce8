pub mod documents;
pub mod results;

pub use documents::IngestTables;
pub use results::ResultTable;

use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid table name: {0:?}")]
    InvalidIdentifier(String),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Exists,
    Created,
}

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("valid regex"));

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Blocking SQLite store. One connection, owned by a single worker.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create `name` with the given column definitions unless it exists.
    /// Idempotent; safe to call on every run.
    pub fn ensure_table(&self, name: &str, columns: &str) -> Result<TableStatus, StoreError> {
        let name = validate_identifier(name)?;

        if self.table_exists(name)? {
            tracing::info!(table = name, "Table already exists");
            return Ok(TableStatus::Exists);
        }

        self.conn
            .execute_batch(&format!("CREATE TABLE {} ({})", name, columns))?;
        tracing::info!(table = name, "Created table");
        Ok(TableStatus::Created)
    }

    pub fn count_rows(&self, table: &str) -> Result<usize, StoreError> {
        let table = validate_identifier(table)?;
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
