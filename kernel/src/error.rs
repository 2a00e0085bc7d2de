// Table Errors
//
// Caller-facing error type for the `Table` API. Module errors convert into
// it, keeping the original error as the source.

use crate::codec::{DecodeError, EncodeError};
use crate::invariants::BatchError;
use crate::log::{LogError, Version};
use crate::replay::{describe_latest, ReplayError};
use crate::storage::StoreError;

pub type TableResult<T> = Result<T, TableError>;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("invalid batch: {0}")]
    Batch(#[from] BatchError),

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodeError),

    #[error("decoding failed: {0}")]
    Decoding(#[from] DecodeError),

    #[error("version conflict: version {version} was committed concurrently; retry the write")]
    VersionConflict { version: Version },

    #[error("outcome of commit for version {version} is unknown")]
    CommitOutcomeUnknown {
        version: Version,
        #[source]
        source: StoreError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("table not found at `{0}`")]
    TableNotFound(String),

    #[error("table already exists at `{0}`")]
    TableAlreadyExists(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("version {requested} does not exist ({})", describe_latest(.latest))]
    VersionNotFound {
        requested: Version,
        latest: Option<Version>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("log error: {0}")]
    Log(#[source] LogError),
}

impl From<LogError> for TableError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::VersionConflict { version } => TableError::VersionConflict { version },
            LogError::AmbiguousCommit { version, source } => {
                TableError::CommitOutcomeUnknown { version, source }
            }
            LogError::Store(source) => TableError::Storage(source),
            LogError::Serialize(source) => TableError::Serialization(source),
            other @ LogError::EmptyCommit => TableError::Log(other),
        }
    }
}

impl From<ReplayError> for TableError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Log(log) => log.into(),
            ReplayError::VersionNotFound { requested, latest } => {
                TableError::VersionNotFound { requested, latest }
            }
        }
    }
}

impl TableError {
    /// Whether retrying the whole write may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TableError::VersionConflict { .. } | TableError::CommitOutcomeUnknown { .. }
        )
    }
}
