// Table Operations
//
// The write and read pipelines of one table:
//
// write: validate → infer → encode → upload data file → commit log entry
// read:  replay log → fetch live files → decode
//
// A log entry referencing a data file is only committed after that file's
// upload has been flushed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::codec::ColumnarEncoder;
use crate::config::TableConfig;
use crate::error::{TableError, TableResult};
use crate::invariants::InvariantEngine;
use crate::log::{
    Action, Add, CommitInfo, FileStats, Format, LogError, Metadata, Protocol, TableId,
    TransactionLog, Version,
};
use crate::replay::{load_records, replay_table_state, TableScan};
use crate::schema::{infer_schema, Schema};
use crate::state::TableState;
use crate::storage::{join_path, BlobStore, TimeoutStore};
use crate::value::Record;

/// Optional settings for table creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub partition_columns: Vec<String>,
    pub configuration: BTreeMap<String, String>,
}

/// Result of a successful batch write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub version: Version,
    /// Data file path relative to the table root.
    pub file: String,
    pub row_count: usize,
    pub size: u64,
}

/// Handle on one table, identified by its root path inside a blob store.
///
/// Handles are cheap and hold no cached table state: every call lists
/// and replays the log afresh.
pub struct Table {
    store: Arc<dyn BlobStore>,
    root: String,
    config: TableConfig,
    log: TransactionLog,
    invariants: InvariantEngine,
    encoder: ColumnarEncoder,
}

impl Table {
    pub fn open(store: Arc<dyn BlobStore>, root: impl Into<String>) -> Self {
        Self::with_config(store, root, TableConfig::default())
    }

    pub fn with_config(store: Arc<dyn BlobStore>, root: impl Into<String>, config: TableConfig) -> Self {
        let root = root.into().trim_end_matches('/').to_owned();
        let store: Arc<dyn BlobStore> = match config.operation_timeout() {
            Some(limit) => Arc::new(TimeoutStore::new(store, limit)),
            None => store,
        };

        Self {
            log: TransactionLog::new(store.clone(), &root, &config.log_dir),
            invariants: InvariantEngine::for_writes(config.strict_field_types),
            encoder: ColumnarEncoder::new(config.encoder_config()),
            store,
            root,
            config,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Create the table by committing version 0 with protocol and metadata
    /// and no data files.
    pub async fn create(&self, schema: &Schema, options: CreateOptions) -> TableResult<Version> {
        if schema.is_empty() {
            return Err(TableError::InvalidSchema("a table needs at least one column".into()));
        }
        if let Some(missing) = options
            .partition_columns
            .iter()
            .find(|c| schema.field(c).is_none())
        {
            return Err(TableError::InvalidSchema(format!(
                "partition column `{missing}` is not in the schema"
            )));
        }
        if self.log.latest_version().await?.is_some() {
            return Err(TableError::TableAlreadyExists(self.root.clone()));
        }

        let now = Utc::now().timestamp_millis();
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "partitionBy".to_owned(),
            serde_json::to_value(&options.partition_columns)?,
        );
        if let Some(description) = &options.description {
            parameters.insert("description".to_owned(), description.clone().into());
        }

        let actions = vec![
            Action::Protocol(Protocol::default()),
            Action::Metadata(Metadata {
                id: TableId::random(),
                name: options.name,
                description: options.description,
                format: Format::default(),
                schema_string: schema.to_schema_string()?,
                partition_columns: options.partition_columns,
                configuration: options.configuration,
                created_time: Some(now),
            }),
            Action::CommitInfo(self.commit_info(now, "CREATE TABLE", parameters, None)),
        ];

        match self.log.commit_version(0, &actions).await {
            Ok(version) => {
                tracing::info!(table = %self.root, columns = schema.len(), "created table");
                Ok(version)
            }
            Err(LogError::VersionConflict { .. }) => {
                Err(TableError::TableAlreadyExists(self.root.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Append one batch as one new data file and one new log version.
    pub async fn write_batch(&self, records: &[Record]) -> TableResult<WriteOutcome> {
        self.invariants.evaluate(records)?;
        let schema = infer_schema(&records[0]);

        let read_version = match self.log.latest_version().await? {
            Some(version) => version,
            None if self.config.auto_create => self.create_for_write(&schema).await?,
            None => return Err(TableError::TableNotFound(self.root.clone())),
        };
        self.check_against_table_schema(&schema).await;

        let encoded = self.encoder.encode(records, &schema)?;
        let size = encoded.size();
        let file = self.data_file_name();
        let path = join_path(&self.root, &file);

        // The upload must be flushed before any log entry may mention it.
        self.store.write_new(&path, encoded.bytes).await?;
        tracing::debug!(%path, size, rows = encoded.row_count, "uploaded data file");

        let stats = FileStats {
            num_records: encoded.row_count as u64,
            null_count: encoded
                .null_counts
                .into_iter()
                .map(|(name, count)| (name, count as u64))
                .collect(),
        };
        let now = Utc::now().timestamp_millis();
        let mut parameters = BTreeMap::new();
        parameters.insert("mode".to_owned(), "Append".into());

        let actions = vec![
            Action::Add(Add {
                path: file.clone(),
                partition_values: BTreeMap::new(),
                size,
                modification_time: now,
                data_change: true,
                stats: Some(serde_json::to_string(&stats)?),
            }),
            Action::CommitInfo(self.commit_info(now, "WRITE", parameters, Some(read_version))),
        ];

        let version = self.log.commit(&actions).await?;
        tracing::info!(table = %self.root, version, rows = encoded.row_count, %file, "committed batch");

        Ok(WriteOutcome {
            version,
            file,
            row_count: encoded.row_count,
            size,
        })
    }

    /// Latest committed version, `None` if the table has no log.
    pub async fn latest_version(&self) -> TableResult<Option<Version>> {
        Ok(self.log.latest_version().await?)
    }

    /// Replayed state at the latest version; empty for a missing table.
    pub async fn snapshot(&self) -> TableResult<TableState> {
        Ok(replay_table_state(&self.log, None).await?.state)
    }

    pub async fn snapshot_at(&self, version: Version) -> TableResult<TableState> {
        Ok(replay_table_state(&self.log, Some(version)).await?.state)
    }

    /// Current table contents. A table without a log reads as empty.
    ///
    /// Data files that cannot be read or decoded are logged and left out;
    /// use [`Table::scan`] to see what was skipped.
    pub async fn read(&self) -> TableResult<Vec<Record>> {
        Ok(self.scan(None).await?.records)
    }

    /// Table contents as of `version`.
    pub async fn read_at(&self, version: Version) -> TableResult<Vec<Record>> {
        Ok(self.scan(Some(version)).await?.records)
    }

    /// Records plus the log entries and files that had to be skipped.
    pub async fn scan(&self, version: Option<Version>) -> TableResult<TableScan> {
        let replayed = replay_table_state(&self.log, version).await?;
        let mut scan = load_records(self.store.as_ref(), &self.root, &replayed.state).await;

        let mut skipped = replayed.skipped;
        skipped.append(&mut scan.skipped);
        scan.skipped = skipped;
        Ok(scan)
    }

    /// Every `commitInfo` in version order.
    pub async fn history(&self) -> TableResult<Vec<(Version, CommitInfo)>> {
        Ok(self.snapshot().await?.commits)
    }

    async fn create_for_write(&self, schema: &Schema) -> TableResult<Version> {
        match self.create(schema, CreateOptions::default()).await {
            Ok(version) => Ok(version),
            // Someone else created it first; append on top of theirs.
            Err(TableError::TableAlreadyExists(_)) => Ok(self.log.latest_version().await?.unwrap_or(0)),
            Err(err) => Err(err),
        }
    }

    /// Warns when the batch's columns differ from the table's declared
    /// columns. The batch is still written with its own inferred schema.
    async fn check_against_table_schema(&self, batch_schema: &Schema) {
        let declared = match self.log.read_entry(0).await {
            Ok(actions) => actions.into_iter().find_map(|a| match a {
                Action::Metadata(meta) => meta.schema().ok(),
                _ => None,
            }),
            Err(_) => None,
        };
        let Some(declared) = declared else {
            return;
        };

        let mut expected = declared.field_names();
        let mut actual = batch_schema.field_names();
        expected.sort_unstable();
        actual.sort_unstable();
        if expected != actual {
            tracing::warn!(
                table = %self.root,
                ?expected,
                ?actual,
                "batch columns differ from table schema"
            );
        }
    }

    fn commit_info(
        &self,
        timestamp: i64,
        operation: &str,
        operation_parameters: BTreeMap<String, serde_json::Value>,
        read_version: Option<Version>,
    ) -> CommitInfo {
        CommitInfo {
            timestamp,
            operation: operation.to_owned(),
            operation_parameters,
            read_version,
            is_blind_append: read_version.map(|_| true),
            engine_info: Some(self.config.engine_info.clone()),
        }
    }

    fn data_file_name(&self) -> String {
        match self.config.compression.file_infix() {
            Some(infix) => format!("part-00000-{}-c000.{infix}.parquet", Uuid::new_v4()),
            None => format!("part-00000-{}-c000.parquet", Uuid::new_v4()),
        }
    }
}
