use anyhow::{Context, Result};
use extract::{BatchRunner, LoadedSchema, RunSummary, default_schema_name};
use ingest::{IngestSummary, PdfReader, bulk_ingest};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::{IngestTables, SqliteStore};
use tracing::{info, warn};

use crate::config::AppConfig;

pub struct ExtractPdfArgs {
    pub pdf_dir: PathBuf,
    pub table: String,
}

pub struct ParseArgs {
    pub schema: PathBuf,
    pub destination: String,
    pub origin: String,
    pub schema_name: Option<String>,
    pub sample: Option<u64>,
}

/// Flip the returned flag on Ctrl-C. Ingestion checks it between files and the
/// batch runner between documents.
pub fn install_cancel_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current item");
            handler_flag.store(true, Ordering::Relaxed);
        }
    });

    flag
}

pub fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    info!(path = %path.display(), "Opening database");
    SqliteStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

pub async fn extract_pdf<'a>(
    store: &'a SqliteStore,
    args: &ExtractPdfArgs,
    cancel: &AtomicBool,
) -> Result<(IngestTables<'a>, IngestSummary)> {
    let files = PdfReader::list_pdfs(&args.pdf_dir)?;
    if files.is_empty() {
        warn!(dir = %args.pdf_dir.display(), "No PDF files found");
    }
    info!(count = files.len(), dir = %args.pdf_dir.display(), "Found PDF files");

    let tables = store
        .ensure_ingest_tables(&args.table)
        .with_context(|| format!("Failed to prepare tables for {}", args.table))?;

    let summary = bulk_ingest(&files, &tables, cancel).await;
    print_ingest_summary(&summary, &tables);

    Ok((tables, summary))
}

pub async fn parse(
    store: &SqliteStore,
    config: &AppConfig,
    args: &ParseArgs,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let schema = LoadedSchema::load(&args.schema)?;
    let schema_name = args
        .schema_name
        .clone()
        .unwrap_or_else(|| default_schema_name(&args.schema));
    info!(
        schema = %schema_name,
        shape = %schema.shape,
        fields = schema.fields.len(),
        "Loaded schema"
    );

    store
        .ensure_results_table(&args.destination)
        .with_context(|| format!("Failed to prepare table {}", args.destination))?;
    let sink = store.result_table(&args.destination)?;

    let sample = args.sample.map(usize::try_from).transpose()?;
    let documents = store
        .query_documents(&args.origin, sample)
        .with_context(|| format!("Failed to read documents from {}", args.origin))?;
    if documents.is_empty() {
        warn!(table = %args.origin, "No documents to parse");
    }

    let runner = BatchRunner::new(config.llm_client()?, schema, schema_name)
        .with_retry(config.retry_policy())
        .with_cancellation(cancel);

    let summary = runner.run(&documents, &sink).await;

    println!("\n{}", summary);
    println!("  Run id: {}", runner.run_id());
    println!("  Results table: {}", sink.name());

    Ok(summary)
}

fn print_ingest_summary(summary: &IngestSummary, tables: &IngestTables<'_>) {
    println!("\nIngestion Summary:");
    println!("  PDF files found: {}", summary.found);
    println!("  Files ingested: {}", summary.ingested);
    println!("  Text extraction failures: {}", summary.extraction_failures);
    println!("  Already ingested (skipped): {}", summary.duplicates);
    println!("  Errors: {}", summary.errors);
    println!("  Content rows written: {}", summary.contents_written);
    println!("  Tables: {}, {}", tables.metadata, tables.contents);
    if summary.cancelled {
        println!("  Ingestion cancelled before all files were read");
    }
}
