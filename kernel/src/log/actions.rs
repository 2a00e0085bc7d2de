// Action Records
//
// A log entry is a JSON Lines file; every line is one externally tagged
// action such as `{"add": {...}}`. Field names follow the Delta
// transaction protocol so entries stay readable by other tooling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Schema;

use super::Version;

/// Stable identifier for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub Uuid);

impl TableId {
    pub fn random() -> Self {
        TableId(Uuid::new_v4())
    }
}

/// A single fact recorded in a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Protocol(Protocol),
    #[serde(rename = "metaData", alias = "metadata")]
    Metadata(Metadata),
    Add(Add),
    CommitInfo(CommitInfo),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Protocol(_) => "protocol",
            Action::Metadata(_) => "metaData",
            Action::Add(_) => "add",
            Action::CommitInfo(_) => "commitInfo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: 1,
            min_writer_version: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub provider: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".into(),
            options: BTreeMap::new(),
        }
    }
}

/// Table identity and schema, written once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: TableId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub format: Format,
    pub schema_string: String,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl Metadata {
    pub fn schema(&self) -> Result<Schema, serde_json::Error> {
        Schema::from_schema_string(&self.schema_string)
    }
}

/// Declares one data file as part of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    /// Path of the data file, relative to the table root.
    pub path: String,
    #[serde(default)]
    pub partition_values: BTreeMap<String, Option<String>>,
    pub size: u64,
    pub modification_time: i64,
    #[serde(default = "default_data_change")]
    pub data_change: bool,
    /// JSON-encoded [`FileStats`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

fn default_data_change() -> bool {
    true
}

impl Add {
    /// Parsed statistics, if present and well-formed.
    pub fn file_stats(&self) -> Option<FileStats> {
        self.stats
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub num_records: u64,
    #[serde(default)]
    pub null_count: BTreeMap<String, u64>,
}

/// Audit record for one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub timestamp: i64,
    pub operation: String,
    #[serde(default)]
    pub operation_parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_info: Option<String>,
}

/// Serializes actions as JSON Lines, one action per line.
pub fn to_json_lines(actions: &[Action]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for action in actions {
        out.push_str(&serde_json::to_string(action)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parses a JSON Lines entry. Blank lines are ignored; lines that are not
/// a known action are skipped with a warning.
pub fn parse_json_lines(text: &str) -> Vec<Action> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<Action>(line) {
            Ok(action) => Some(action),
            Err(err) => {
                tracing::warn!(line = n + 1, %err, "skipping unrecognized log action");
                None
            }
        })
        .collect()
}
