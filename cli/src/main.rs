use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use lakelog_kernel::log::CommitInfo;
use lakelog_kernel::schema::infer_schema;
use lakelog_kernel::storage::LocalFsBlobStore;
use lakelog_kernel::{CreateOptions, Field, Record, Schema, Table, TableConfig, Version};

/// Lakelog table CLI
#[derive(Parser, Debug)]
#[command(name = "lakelog")]
#[command(about = "Versioned columnar tables on a local directory", long_about = None)]
struct Cli {
    /// Directory acting as the blob store root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Table path relative to the root
    #[arg(long, global = true, default_value = "table")]
    table: String,

    /// Path to table config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a table (version 0)
    Create {
        /// Schema JSON file (`{"type":"struct","fields":[...]}`)
        #[arg(long, conflicts_with = "infer_from")]
        schema: Option<PathBuf>,

        /// Infer the schema from the first record of this file
        #[arg(long)]
        infer_from: Option<PathBuf>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Partition column, may be repeated
        #[arg(long = "partition-by")]
        partition_by: Vec<String>,
    },

    /// Append a batch of records read from a JSON array or JSON Lines file
    Write {
        /// Input file, `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print table contents as a JSON array
    Read {
        /// Read as of this version instead of the latest
        #[arg(long)]
        version: Option<Version>,
    },

    /// Print the latest committed version
    Version,

    /// Print every commit's info
    History,
}

#[derive(Debug, Serialize)]
struct VersionOutput {
    version: Option<Version>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    version: Version,
    #[serde(flatten)]
    commit: CommitInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // ----------------------------
    // Load config
    // ----------------------------
    let config = if let Some(path) = &cli.config {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        TableConfig::from_json_str(&data)?
    } else {
        TableConfig::default_config()
    };

    // ----------------------------
    // Open table
    // ----------------------------
    let store = Arc::new(LocalFsBlobStore::new(&cli.root));
    let table = Table::with_config(store, cli.table.as_str(), config);

    // ----------------------------
    // Run command
    // ----------------------------
    let output = match cli.command {
        Command::Create {
            schema,
            infer_from,
            name,
            description,
            partition_by,
        } => {
            let schema = match (schema, infer_from) {
                (Some(path), _) => parse_schema(&fs::read_to_string(path)?)?,
                (None, Some(path)) => {
                    let records = parse_records(&fs::read_to_string(path)?)?;
                    let first = records
                        .first()
                        .ok_or_else(|| anyhow!("no records to infer a schema from"))?;
                    infer_schema(first)
                }
                (None, None) => bail!("either --schema or --infer-from is required"),
            };
            let options = CreateOptions {
                name,
                description,
                partition_columns: partition_by,
                ..Default::default()
            };
            let version = table.create(&schema, options).await?;
            serde_json::to_value(VersionOutput {
                version: Some(version),
            })?
        }
        Command::Write { input } => {
            let records = parse_records(&read_input(&input)?)?;
            let outcome = table.write_batch(&records).await?;
            serde_json::to_value(outcome)?
        }
        Command::Read { version } => {
            let scan = table.scan(version).await?;
            if !scan.skipped.is_empty() {
                tracing::warn!(skipped = scan.skipped.len(), "read is incomplete");
            }
            scan.records.iter().map(Record::to_json).collect()
        }
        Command::Version => serde_json::to_value(VersionOutput {
            version: table.latest_version().await?,
        })?,
        Command::History => {
            let entries: Vec<_> = table
                .history()
                .await?
                .into_iter()
                .map(|(version, commit)| HistoryEntry { version, commit })
                .collect();
            serde_json::to_value(entries)?
        }
    };

    // ----------------------------
    // Output
    // ----------------------------
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("lakelog={level},lakelog_kernel={level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut data = String::new();
        std::io::stdin().read_to_string(&mut data)?;
        Ok(data)
    } else {
        fs::read_to_string(input).with_context(|| format!("reading {input}"))
    }
}

/// Accepts either the full struct form or a bare array of fields.
fn parse_schema(data: &str) -> Result<Schema> {
    if data.trim_start().starts_with('[') {
        let fields: Vec<Field> = serde_json::from_str(data)?;
        Ok(Schema::new(fields))
    } else {
        Ok(Schema::from_schema_string(data)?)
    }
}

/// Accepts a JSON array of objects or one object per line.
fn parse_records(data: &str) -> Result<Vec<Record>> {
    let trimmed = data.trim_start();
    let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    };

    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            Record::from_json(value).ok_or_else(|| anyhow!("record {i} is not a JSON object"))
        })
        .collect()
}
