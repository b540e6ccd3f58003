//! Error taxonomy for the orchestration core.

use modelboard_state::{StoreError, SubmissionId};
use thiserror::Error;

/// Errors surfaced by fetch, orchestration, and leaderboard operations.
///
/// Failures local to one submission (`JobFailure`, `JobKilled`) are
/// recorded on that submission and never abort sibling submissions;
/// they appear here only when reported individually. `Store` errors are
/// fatal to the current operation and leave prior committed state intact.
#[derive(Error, Debug)]
pub enum BoardError {
    /// A training/testing process exited non-zero or produced no score.
    #[error("Job failed for {id}: {reason}")]
    JobFailure { id: SubmissionId, reason: String },

    /// A job was terminated by explicit cancellation.
    #[error("Job killed for {id}")]
    JobKilled { id: SubmissionId },

    /// A tag filter matched no submission.
    #[error("no model found for tag: {tag}")]
    NoModelFound { tag: String },

    /// A single-submission selection matched more than one record.
    #[error("ambiguous selection: {matches} submissions match")]
    AmbiguousSelection { matches: usize },

    /// Store unavailable or corrupt; aborts the current operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error outside the store (repos, job handles, predictions).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed score or prediction artifact.
    #[error("Artifact error: {0}")]
    Artifact(String),
}

impl From<serde_json::Error> for BoardError {
    fn from(e: serde_json::Error) -> Self {
        BoardError::Artifact(e.to_string())
    }
}

/// Result type for core operations
pub type BoardResult<T> = std::result::Result<T, BoardError>;
