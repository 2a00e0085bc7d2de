// Table State Machine
//
// Derives table state from a sequence of log actions.
// This module is pure, deterministic, and side-effect free.

use crate::log::{Action, Add, CommitInfo, Metadata, Protocol, Version};
use crate::schema::Schema;

/// Lifecycle stage of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// No log entries have been applied.
    #[default]
    Absent,

    /// Protocol and metadata are known; the table accepts writes.
    Active,

    /// Data files were seen without table metadata, e.g. because the
    /// creating entry could not be read.
    Headless,
}

/// Derived state of a table at one version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableState {
    /// Last version folded into this state.
    pub version: Option<Version>,
    pub protocol: Option<Protocol>,
    pub metadata: Option<Metadata>,
    /// Live files in commit order. Never deduplicated: each `add` is a
    /// distinct file.
    pub files: Vec<Add>,
    pub commits: Vec<(Version, CommitInfo)>,
}

impl TableState {
    pub fn lifecycle(&self) -> Lifecycle {
        match (&self.metadata, self.version) {
            (Some(_), _) => Lifecycle::Active,
            (None, Some(_)) if !self.files.is_empty() => Lifecycle::Headless,
            _ => Lifecycle::Absent,
        }
    }

    /// Table schema from the metadata action, if present and parseable.
    pub fn schema(&self) -> Option<Schema> {
        self.metadata.as_ref().and_then(|m| m.schema().ok())
    }

    /// Total row count according to file statistics. Files without stats
    /// count as zero.
    pub fn row_count(&self) -> u64 {
        self.files
            .iter()
            .filter_map(Add::file_stats)
            .map(|s| s.num_records)
            .sum()
    }
}

/// Errors produced during state transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal state transition: {0}")]
    IllegalTransition(String),
}

/// Stateful reducer for log actions.
#[derive(Debug, Default)]
pub struct TableStateMachine {
    state: TableState,
}

impl TableStateMachine {
    /// Create a new state machine for a table with no history.
    pub fn new() -> Self {
        Self {
            state: TableState::default(),
        }
    }

    /// Apply a single action committed at `version`.
    ///
    /// Protocol and metadata are immutable once set; a second declaration
    /// is rejected and leaves the state untouched.
    pub fn apply(&mut self, version: Version, action: &Action) -> Result<(), StateError> {
        match action {
            Action::Protocol(protocol) => {
                if let Some(existing) = &self.state.protocol {
                    if existing != protocol {
                        return Err(StateError::IllegalTransition(format!(
                            "protocol change at version {version} is not supported"
                        )));
                    }
                } else {
                    self.state.protocol = Some(protocol.clone());
                }
            }
            Action::Metadata(metadata) => {
                if self.state.metadata.is_some() {
                    return Err(StateError::IllegalTransition(format!(
                        "metadata change at version {version}: schema evolution is not supported"
                    )));
                }
                self.state.metadata = Some(metadata.clone());
            }
            Action::Add(add) => self.state.files.push(add.clone()),
            Action::CommitInfo(info) => self.state.commits.push((version, info.clone())),
        }
        self.state.version = Some(self.state.version.map_or(version, |v| v.max(version)));
        Ok(())
    }

    /// Record that `version` was replayed, even if it held no actions.
    pub fn mark_version(&mut self, version: Version) {
        self.state.version = Some(self.state.version.map_or(version, |v| v.max(version)));
    }

    /// Get the current derived state.
    pub fn current_state(&self) -> &TableState {
        &self.state
    }

    pub fn into_state(self) -> TableState {
        self.state
    }
}
