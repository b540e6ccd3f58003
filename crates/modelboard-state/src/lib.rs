//! Modelboard-State: persistence layer for the submission pipeline
//!
//! This crate is the single source of truth for submission records and
//! the derived leaderboard tables. It exposes:
//!
//! - `SubmissionStore`: the backend-agnostic storage trait
//! - `MemorySubmissionStore`: in-memory fake for tests
//! - `JsonSubmissionStore`: JSON-file-backed store with atomic replace
//!
//! Leaderboard tables are replaced wholesale, never patched; submission
//! mutations go through `apply` with compare-and-set state semantics.

mod error;
mod json_store;
pub mod memory;
mod store;
mod submission;

pub use error::StoreError;
pub use json_store::JsonSubmissionStore;
pub use memory::MemorySubmissionStore;
pub use store::{SubmissionFilter, SubmissionMutation, SubmissionStore};
pub use submission::{
    LeaderboardRow, Phase, Score, Submission, SubmissionId, SubmissionState, TABLE_CLASSICAL,
    TABLE_CLASSICAL_TEST, TABLE_COMBINED, TABLE_TIMES,
};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
