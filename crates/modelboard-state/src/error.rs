//! Error types for modelboard-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store file missing, unreadable, or corrupt. Fatal, no repair.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Serialization or deserialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Insert with an identity that already exists
    #[error("Submission already exists: {team}/{tag}")]
    Duplicate { team: String, tag: String },

    /// Lookup of an identity that does not exist
    #[error("Submission not found: {team}/{tag}")]
    NotFound { team: String, tag: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}
