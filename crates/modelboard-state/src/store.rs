//! Storage trait for the submission pipeline.
//!
//! `SubmissionStore` is the only shared mutable resource in the system.
//! All state transitions go through `apply`, an atomic read-modify-write
//! restricted to the mutation's populated fields, with optional
//! compare-and-set on the current state. Leaderboard tables are replaced
//! wholesale via `put_table`.
//!
//! Backends must serialize concurrent `apply` calls so two orchestrator
//! passes cannot interleave partial writes to the same record. An
//! in-memory fake is provided in the `memory` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::submission::{LeaderboardRow, Score, Submission, SubmissionId, SubmissionState};
use crate::StoreResult;

/// Snapshot filter. Fields combine with AND; `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    /// Restrict to submissions in this exact state.
    pub state: Option<SubmissionState>,
    /// Restrict to submissions whose tag contains this substring.
    pub tag_contains: Option<String>,
}

impl SubmissionFilter {
    /// Matches every submission.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches submissions in the given state.
    pub fn by_state(state: SubmissionState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Matches submissions whose tag contains the substring, any state.
    pub fn by_tag(tag: impl Into<String>) -> Self {
        Self {
            tag_contains: Some(tag.into()),
            ..Self::default()
        }
    }

    /// Whether a submission passes this filter.
    pub fn matches(&self, sub: &Submission) -> bool {
        if let Some(state) = self.state {
            if sub.state != state {
                return false;
            }
        }
        if let Some(tag) = &self.tag_contains {
            if !sub.id.tag.contains(tag.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Field-restricted mutation applied atomically by `SubmissionStore::apply`.
///
/// Only populated fields are written. `expect_state` turns the apply into
/// a compare-and-set: records whose current state differs are skipped
/// (not an error), which is how a batch avoids double-committing a
/// submission that a concurrent pass already moved.
#[derive(Debug, Clone, Default)]
pub struct SubmissionMutation {
    /// Skip records whose current state is not this.
    pub expect_state: Option<SubmissionState>,
    pub set_state: Option<SubmissionState>,
    pub set_train_scores: Option<BTreeMap<u32, Score>>,
    pub set_test_scores: Option<BTreeMap<u32, Score>>,
    /// `Some(None)` clears the error detail, `Some(Some(d))` sets it.
    pub set_error: Option<Option<String>>,
    pub set_trained_at: Option<DateTime<Utc>>,
    pub set_tested_at: Option<DateTime<Utc>>,
    /// Replaces the recorded duration, so an operator-forced re-run does
    /// not inflate the times leaderboard.
    pub set_train_duration_ms: Option<u64>,
    pub set_test_duration_ms: Option<u64>,
}

impl SubmissionMutation {
    /// Plain state change with no CAS guard (operator overrides).
    pub fn state(to: SubmissionState) -> Self {
        Self {
            set_state: Some(to),
            ..Self::default()
        }
    }

    /// Guarded state change: applies only to records currently in `from`.
    pub fn transition(from: SubmissionState, to: SubmissionState) -> Self {
        Self {
            expect_state: Some(from),
            set_state: Some(to),
            ..Self::default()
        }
    }

    /// Apply this mutation in place. The store's locking makes this atomic.
    pub fn apply_to(&self, sub: &mut Submission) {
        if let Some(state) = self.set_state {
            sub.state = state;
        }
        if let Some(scores) = &self.set_train_scores {
            sub.train_scores = scores.clone();
        }
        if let Some(scores) = &self.set_test_scores {
            sub.test_scores = scores.clone();
        }
        if let Some(error) = &self.set_error {
            sub.error = error.clone();
        }
        if let Some(at) = self.set_trained_at {
            sub.trained_at = Some(at);
        }
        if let Some(at) = self.set_tested_at {
            sub.tested_at = Some(at);
        }
        if let Some(ms) = self.set_train_duration_ms {
            sub.train_duration_ms = ms;
        }
        if let Some(ms) = self.set_test_duration_ms {
            sub.test_duration_ms = ms;
        }
    }
}

/// Submission and leaderboard persistence.
///
/// Guarantees:
/// - Identity (team, tag) is unique; `insert` rejects duplicates.
/// - `get` returns a consistent snapshot ordered by identity.
/// - `apply` is serialized across concurrent callers and writes only the
///   identity set passed in; with `expect_state` set it skips records a
///   concurrent pass already moved.
/// - `put_table` replaces the named table wholesale.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a newly discovered submission. Fails on duplicate identity.
    async fn insert(&self, submission: Submission) -> StoreResult<()>;

    /// Fetch submissions matching the filter, ordered by identity.
    async fn get(&self, filter: &SubmissionFilter) -> StoreResult<Vec<Submission>>;

    /// Fetch one submission by exact identity, if present.
    async fn get_by_id(&self, id: &SubmissionId) -> StoreResult<Option<Submission>>;

    /// Atomically mutate the given identities. Unknown identities and
    /// CAS-skipped records are not counted. Returns how many records
    /// were actually mutated.
    async fn apply(&self, ids: &[SubmissionId], mutation: &SubmissionMutation)
        -> StoreResult<usize>;

    /// Replace a leaderboard table wholesale.
    async fn put_table(&self, name: &str, rows: Vec<LeaderboardRow>) -> StoreResult<()>;

    /// Read a leaderboard table; empty if never written.
    async fn get_table(&self, name: &str) -> StoreResult<Vec<LeaderboardRow>>;
}
