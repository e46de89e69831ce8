mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::commands::{ExtractPdfArgs, ParseArgs};
use crate::config::{AppConfig, LoggingConfig};

/// Extract text from PDF files and parse it into schema-shaped JSON records.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract text from PDF files into `{table}_metadata` / `{table}_contents`.
    ExtractPdf {
        /// Directory containing PDF files.
        #[arg(long)]
        pdf_dir: PathBuf,
        /// Base table name.
        #[arg(long)]
        table: String,
    },

    /// Parse stored document text into structured JSON with a language model.
    ParseFlexible {
        /// Path to the JSON schema file.
        #[arg(long)]
        schema: PathBuf,
        /// Table receiving parsed data.
        #[arg(long)]
        parsed_data_destination: String,
        /// Table containing `file_id` / `text_content` rows.
        #[arg(long)]
        parsed_data_origin: String,
        /// Label stored with every row (defaults to the schema file name).
        #[arg(long)]
        schema_name: Option<String>,
        /// Randomly sample this many documents instead of processing all.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        sample: Option<u64>,
    },

    /// Run PDF extraction followed by parsing.
    FullPipeline {
        #[arg(long)]
        pdf_dir: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long)]
        schema: PathBuf,
        /// Defaults to `{table}_parsed`.
        #[arg(long)]
        parsed_data_destination: Option<String>,
        #[arg(long)]
        schema_name: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        sample: Option<u64>,
    },
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    if logging.json || force_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.log_json);

    let cancel = commands::install_cancel_handler();

    match cli.command {
        Command::ExtractPdf { pdf_dir, table } => {
            let store = commands::open_store(&config)?;
            commands::extract_pdf(&store, &ExtractPdfArgs { pdf_dir, table }, &cancel).await?;
        }
        Command::ParseFlexible {
            schema,
            parsed_data_destination,
            parsed_data_origin,
            schema_name,
            sample,
        } => {
            config.validate()?;
            let store = commands::open_store(&config)?;
            let args = ParseArgs {
                schema,
                destination: parsed_data_destination,
                origin: parsed_data_origin,
                schema_name,
                sample,
            };
            commands::parse(&store, &config, &args, cancel).await?;
        }
        Command::FullPipeline {
            pdf_dir,
            table,
            schema,
            parsed_data_destination,
            schema_name,
            sample,
        } => {
            config.validate()?;
            let store = commands::open_store(&config)?;

            println!("=== STEP 1: PDF EXTRACTION ===");
            let (tables, summary) = commands::extract_pdf(
                &store,
                &ExtractPdfArgs {
                    pdf_dir,
                    table: table.clone(),
                },
                &cancel,
            )
            .await?;
            if summary.cancelled {
                warn!("Ingestion was cancelled, skipping text parsing");
                return Ok(());
            }

            println!("\n=== STEP 2: TEXT PARSING ===");
            let args = ParseArgs {
                schema,
                destination: parsed_data_destination
                    .unwrap_or_else(|| format!("{}_parsed", table)),
                origin: tables.contents,
                schema_name,
                sample,
            };
            commands::parse(&store, &config, &args, cancel).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flexible_flags() {
        let cli = Cli::try_parse_from([
            "data-extract",
            "parse-flexible",
            "--schema",
            "schema.json",
            "--parsed-data-destination",
            "parsed",
            "--parsed-data-origin",
            "docs_contents",
            "--sample",
            "5",
        ])
        .unwrap();

        match cli.command {
            Command::ParseFlexible {
                sample,
                schema_name,
                ..
            } => {
                assert_eq!(sample, Some(5));
                assert_eq!(schema_name, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_zero_sample_is_rejected() {
        let result = Cli::try_parse_from([
            "data-extract",
            "parse-flexible",
            "--schema",
            "schema.json",
            "--parsed-data-destination",
            "parsed",
            "--parsed-data-origin",
            "docs_contents",
            "--sample",
            "0",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn test_full_pipeline_requires_schema() {
        assert!(
            Cli::try_parse_from([
                "data-extract",
                "full-pipeline",
                "--pdf-dir",
                "pdfs",
                "--table",
                "docs",
            ])
            .is_err()
        );
    }
}
