//! Submission records and leaderboard rows.
//!
//! A submission is identified by (team, tag). Its lifecycle is
//! `new -> trained -> tested`, with `error` reachable from any active
//! phase; regressions happen only through operator overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Classical leaderboard table (validation scores).
pub const TABLE_CLASSICAL: &str = "leaderboard_classical";
/// Classical leaderboard over held-out test scores.
pub const TABLE_CLASSICAL_TEST: &str = "leaderboard_classical_test";
/// Ensemble-combination (contributivity) leaderboard table.
pub const TABLE_COMBINED: &str = "leaderboard_combined";
/// Execution-time leaderboard table.
pub const TABLE_TIMES: &str = "leaderboard_times";

/// Submission identity: (team, tag).
///
/// `Ord` gives the deterministic iteration and tie-break order used by
/// the leaderboard engines (team first, then tag).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionId {
    pub team: String,
    pub tag: String,
}

impl SubmissionId {
    pub fn new(team: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            tag: tag.into(),
        }
    }

    /// Deterministic uid for this identity (first 12 hex chars of the
    /// SHA-256 of `team/tag`). Used as the on-disk directory segment.
    pub fn uid(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.team.as_bytes());
        hasher.update(b"/");
        hasher.update(self.tag.as_bytes());
        hex::encode(hasher.finalize())[..12].to_string()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.team, self.tag)
    }
}

/// Lifecycle state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Discovered, not yet attempted.
    New,
    /// All folds trained; validation scores recorded.
    Trained,
    /// Held-out evaluation completed; test scores recorded.
    Tested,
    /// Training or testing failed; detail retained, excluded from leaderboards.
    Error,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::New => "new",
            SubmissionState::Trained => "trained",
            SubmissionState::Tested => "tested",
            SubmissionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubmissionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SubmissionState::New),
            "trained" => Ok(SubmissionState::Trained),
            "tested" => Ok(SubmissionState::Tested),
            "error" => Ok(SubmissionState::Error),
            other => Err(format!("unknown submission state: {other}")),
        }
    }
}

/// Execution phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Test => "test",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-fold metric value, with its optional recalibrated variant.
///
/// Both values are produced by the evaluation job; calibration is a
/// monotonic recalibration fit on the same fold set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrated: Option<f64>,
}

impl Score {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            calibrated: None,
        }
    }

    /// The calibrated variant when requested and present, else the raw value.
    pub fn effective(&self, calibrate: bool) -> f64 {
        if calibrate {
            self.calibrated.unwrap_or(self.value)
        } else {
            self.value
        }
    }
}

/// Full submission record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Identity (team, tag); unique within the store.
    pub id: SubmissionId,
    /// Deterministic identity uid (directory segment).
    pub uid: String,
    /// Unique run id assigned at discovery.
    pub run_id: String,
    /// Submission directory (model code and artifacts).
    pub path: PathBuf,
    /// Current lifecycle state.
    pub state: SubmissionState,
    /// Validation score per trained fold.
    pub train_scores: BTreeMap<u32, Score>,
    /// Held-out test score per fold.
    pub test_scores: BTreeMap<u32, Score>,
    /// Failure detail, set when `state == Error`.
    pub error: Option<String>,
    /// Discovery timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Set when training completed.
    pub trained_at: Option<DateTime<Utc>>,
    /// Set when testing completed.
    pub tested_at: Option<DateTime<Utc>>,
    /// Accumulated training wall time across folds.
    pub train_duration_ms: u64,
    /// Accumulated testing wall time across folds.
    pub test_duration_ms: u64,
}

impl Submission {
    /// Create a freshly discovered submission in state `new`.
    pub fn discovered(id: SubmissionId, path: PathBuf) -> Self {
        let uid = id.uid();
        Self {
            id,
            uid,
            run_id: uuid::Uuid::new_v4().to_string(),
            path,
            state: SubmissionState::New,
            train_scores: BTreeMap::new(),
            test_scores: BTreeMap::new(),
            error: None,
            submitted_at: Utc::now(),
            trained_at: None,
            tested_at: None,
            train_duration_ms: 0,
            test_duration_ms: 0,
        }
    }

    /// Scores for the given phase.
    pub fn scores(&self, phase: Phase) -> &BTreeMap<u32, Score> {
        match phase {
            Phase::Train => &self.train_scores,
            Phase::Test => &self.test_scores,
        }
    }
}

/// One row of a leaderboard table. Derived only; tables are recomputed
/// from the submission snapshot and replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub team: String,
    pub tag: String,
    pub score: f64,
    pub rank: u32,
}

impl LeaderboardRow {
    pub fn new(id: &SubmissionId, score: f64, rank: u32) -> Self {
        Self {
            team: id.team.clone(),
            tag: id.tag.clone(),
            score,
            rank,
        }
    }
}
