// Transaction Log
//
// The authoritative, append-only record of a table. Each version is one
// JSON Lines file under `<table>/<log_dir>/`, named by its zero-padded
// version so lexicographic order equals numeric order. A log entry is
// created with create-only semantics: two writers racing for the same
// version cannot both succeed.

use std::sync::Arc;

use bytes::Bytes;

use crate::storage::{join_path, BlobStore, StoreError};

pub mod actions;

pub use actions::{Action, Add, CommitInfo, FileStats, Format, Metadata, Protocol, TableId};

/// Logical version of a table.
pub type Version = u64;

/// Width of the zero-padded version in log file names.
pub const VERSION_WIDTH: usize = 20;

const ENTRY_SUFFIX: &str = ".json";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("version conflict: version {version} was committed by another writer")]
    VersionConflict { version: Version },

    #[error("commit of version {version} timed out; the entry may or may not exist")]
    AmbiguousCommit {
        version: Version,
        #[source]
        source: StoreError,
    },

    #[error("refusing to commit an empty action list")]
    EmptyCommit,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("action serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File name of the log entry for `version`.
pub fn entry_file_name(version: Version) -> String {
    format!("{version:0width$}{ENTRY_SUFFIX}", width = VERSION_WIDTH)
}

/// Parses a log entry file name back to its version. Anything that is not
/// `<digits>.json` is rejected.
pub fn parse_entry_file_name(name: &str) -> Option<Version> {
    let digits = name.strip_suffix(ENTRY_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Version assignment and durable append of log entries for one table.
#[derive(Clone)]
pub struct TransactionLog {
    store: Arc<dyn BlobStore>,
    log_path: String,
}

impl TransactionLog {
    pub fn new(store: Arc<dyn BlobStore>, table_root: &str, log_dir: &str) -> Self {
        Self {
            store,
            log_path: join_path(table_root, log_dir),
        }
    }

    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    pub fn entry_path(&self, version: Version) -> String {
        join_path(&self.log_path, &entry_file_name(version))
    }

    /// Versions of every entry in the log directory, ascending.
    ///
    /// Directories and malformed file names are skipped. Versions need not
    /// be contiguous.
    pub async fn list_versions(&self) -> Result<Vec<Version>, LogError> {
        let entries = self.store.list(&self.log_path).await?;

        let mut versions: Vec<Version> = entries
            .iter()
            .filter(|e| !e.is_directory)
            .filter_map(|e| {
                let parsed = parse_entry_file_name(e.file_name());
                if parsed.is_none() {
                    tracing::debug!(name = %e.name, "ignoring non-entry file in log directory");
                }
                parsed
            })
            .collect();
        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }

    /// Highest committed version, or `None` when the table has no log.
    pub async fn latest_version(&self) -> Result<Option<Version>, LogError> {
        let latest = self.list_versions().await?.last().copied();
        tracing::debug!(log = %self.log_path, ?latest, "resolved latest version");
        Ok(latest)
    }

    /// Commits `actions` as the next version and returns that version.
    ///
    /// Fails with [`LogError::VersionConflict`] when another writer took
    /// the version between the lookup and the create.
    pub async fn commit(&self, actions: &[Action]) -> Result<Version, LogError> {
        let next = self.latest_version().await?.map_or(0, |v| v + 1);
        self.commit_version(next, actions).await
    }

    /// Commits `actions` at exactly `version`.
    pub async fn commit_version(&self, version: Version, actions: &[Action]) -> Result<Version, LogError> {
        if actions.is_empty() {
            return Err(LogError::EmptyCommit);
        }

        let content = Bytes::from(actions::to_json_lines(actions)?);
        let len = content.len() as u64;
        let path = self.entry_path(version);

        self.store.create_file(&path).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => LogError::VersionConflict { version },
            other => commit_failure(version, other),
        })?;
        self.store
            .append(&path, 0, content)
            .await
            .map_err(|e| commit_failure(version, e))?;
        self.store
            .flush(&path, len)
            .await
            .map_err(|e| commit_failure(version, e))?;

        tracing::info!(log = %self.log_path, version, actions = actions.len(), "committed log entry");
        Ok(version)
    }

    /// Reads and parses one log entry.
    pub async fn read_entry(&self, version: Version) -> Result<Vec<Action>, LogError> {
        let bytes = self.store.read(&self.entry_path(version)).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(actions::parse_json_lines(&text))
    }
}

fn commit_failure(version: Version, err: StoreError) -> LogError {
    match err {
        StoreError::Timeout { .. } => LogError::AmbiguousCommit {
            version,
            source: err,
        },
        other => LogError::Store(other),
    }
}
