// Deterministic Replay Engine
//
// Replays log entries 0..=target in order into a `TableState`, then
// decodes the live files into records. Both steps favor availability:
// an unreadable log entry or data file is skipped with a warning and
// reported back to the caller instead of failing the whole read.

use crate::codec::decode;
use crate::log::{LogError, TransactionLog, Version};
use crate::state::{TableState, TableStateMachine};
use crate::storage::{join_path, BlobStore};
use crate::value::Record;

/// Errors that can occur during replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("version {requested} does not exist ({})", describe_latest(.latest))]
    VersionNotFound {
        requested: Version,
        latest: Option<Version>,
    },
}

pub(crate) fn describe_latest(latest: &Option<Version>) -> String {
    match latest {
        Some(version) => format!("latest is {version}"),
        None => "table has no log".to_owned(),
    }
}

/// Something replay or reconstruction had to leave out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    LogEntry { version: Version, reason: String },
    /// A run of versions with no entry file, `first..=last`.
    MissingVersions { first: Version, last: Version },
    Action { version: Version, reason: String },
    DataFile { path: String, reason: String },
}

/// Replayed state plus everything that was skipped on the way.
#[derive(Debug, Clone, Default)]
pub struct Replayed {
    pub state: TableState,
    pub skipped: Vec<Skipped>,
}

/// Decoded table contents.
#[derive(Debug, Clone, Default)]
pub struct TableScan {
    pub version: Option<Version>,
    pub records: Vec<Record>,
    pub skipped: Vec<Skipped>,
}

/// Replay the log up to `target` (or the latest version) and derive the
/// table state.
///
/// Only entries present in the log directory are read. Missing versions
/// are reported as one `MissingVersions` item per gap.
///
/// This is the *only* supported way to derive table state.
pub async fn replay_table_state(
    log: &TransactionLog,
    target: Option<Version>,
) -> Result<Replayed, ReplayError> {
    let versions = log.list_versions().await?;
    let Some(&latest) = versions.last() else {
        return match target {
            Some(requested) => Err(ReplayError::VersionNotFound {
                requested,
                latest: None,
            }),
            None => Ok(Replayed::default()),
        };
    };

    let target = match target {
        Some(requested) if requested > latest => {
            return Err(ReplayError::VersionNotFound {
                requested,
                latest: Some(latest),
            })
        }
        Some(requested) => requested,
        None => latest,
    };

    let mut state_machine = TableStateMachine::new();
    let mut skipped = Vec::new();
    let mut expected: Version = 0;

    for version in versions.into_iter().take_while(|v| *v <= target) {
        if version > expected {
            tracing::warn!(first = expected, last = version - 1, "log has missing versions");
            skipped.push(Skipped::MissingVersions {
                first: expected,
                last: version - 1,
            });
        }
        expected = version + 1;

        let actions = match log.read_entry(version).await {
            Ok(actions) => actions,
            Err(err) => {
                tracing::warn!(version, %err, "skipping unreadable log entry");
                skipped.push(Skipped::LogEntry {
                    version,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        for action in &actions {
            if let Err(err) = state_machine.apply(version, action) {
                tracing::warn!(version, action = action.kind(), %err, "skipping log action");
                skipped.push(Skipped::Action {
                    version,
                    reason: err.to_string(),
                });
            }
        }
        state_machine.mark_version(version);
    }

    if target >= expected {
        skipped.push(Skipped::MissingVersions {
            first: expected,
            last: target,
        });
    }
    state_machine.mark_version(target);

    let state = state_machine.into_state();
    tracing::debug!(
        version = target,
        files = state.files.len(),
        skipped = skipped.len(),
        "replayed table state"
    );
    Ok(Replayed { state, skipped })
}

/// Fetch and decode every live file of `state`, concatenating records in
/// file order. Files that cannot be read or decoded contribute nothing.
pub async fn load_records(store: &dyn BlobStore, table_root: &str, state: &TableState) -> TableScan {
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for add in &state.files {
        let path = join_path(table_root, &add.path);

        let bytes = match store.read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%path, %err, "data file unreadable; its rows are omitted");
                skipped.push(Skipped::DataFile {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        match decode(bytes) {
            Ok(decoded) => records.extend(decoded),
            Err(err) => {
                tracing::warn!(%path, %err, "data file undecodable; its rows are omitted");
                skipped.push(Skipped::DataFile {
                    path,
                    reason: err.to_string(),
                });
            }
        }
    }

    TableScan {
        version: state.version,
        records,
        skipped,
    }
}
