//! Leaderboard computation.
//!
//! Three derived tables, each recomputed from the submission snapshot
//! and replaced wholesale:
//! - classical: each submission ranked by its own aggregate fold score
//! - combined: contributivity from greedy ensemble forward selection
//! - times: total recorded execution time
//!
//! All tables for a run are computed before any is written, so a
//! failure leaves every table at its previous value.

pub mod aggregate;
pub mod combine;
pub mod times;

use std::sync::Arc;

use tracing::info;

use modelboard_state::{
    LeaderboardRow, Phase, Submission, SubmissionFilter, SubmissionState, SubmissionStore,
    TABLE_CLASSICAL, TABLE_CLASSICAL_TEST, TABLE_COMBINED, TABLE_TIMES,
};

use crate::error::BoardResult;

pub use combine::{
    Accuracy, CombinationState, Combiner, FsPredictionSource, MemoryPredictionSource, Metric,
    PredictionSource, Rmse,
};

/// Which leaderboard table(s) to recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardKind {
    All,
    Classical,
    Combined,
    Times,
}

impl LeaderboardKind {
    fn wants(&self, other: LeaderboardKind) -> bool {
        *self == LeaderboardKind::All || *self == other
    }
}

/// Options for one leaderboard run.
#[derive(Debug, Clone, Copy)]
pub struct LeaderboardOptions {
    pub kind: LeaderboardKind,
    /// Also compute the held-out-test variants.
    pub test: bool,
    /// Use the calibrated score variant where present.
    pub calibrate: bool,
}

/// Recomputes and replaces leaderboard tables.
pub struct LeaderboardEngine {
    store: Arc<dyn SubmissionStore>,
    predictions: Arc<dyn PredictionSource>,
    metric: Arc<dyn Metric>,
    combiner_rounds: u32,
}

impl LeaderboardEngine {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        predictions: Arc<dyn PredictionSource>,
        metric: Arc<dyn Metric>,
        combiner_rounds: u32,
    ) -> Self {
        Self {
            store,
            predictions,
            metric,
            combiner_rounds,
        }
    }

    /// Recompute the requested tables. Returns the names of the tables
    /// that were replaced.
    pub async fn run(&self, options: &LeaderboardOptions) -> BoardResult<Vec<String>> {
        let snapshot = self.store.get(&SubmissionFilter::all()).await?;
        let scored: Vec<Submission> = snapshot
            .into_iter()
            .filter(|s| {
                matches!(
                    s.state,
                    SubmissionState::Trained | SubmissionState::Tested
                )
            })
            .collect();
        let tested: Vec<Submission> = scored
            .iter()
            .filter(|s| s.state == SubmissionState::Tested)
            .cloned()
            .collect();

        // Compute everything first; only then replace tables.
        let mut tables: Vec<(&str, Vec<LeaderboardRow>)> = Vec::new();

        if options.kind.wants(LeaderboardKind::Classical) {
            tables.push((
                TABLE_CLASSICAL,
                aggregate::classical(
                    &scored,
                    Phase::Train,
                    options.calibrate,
                    self.metric.greater_is_better(),
                ),
            ));
            if options.test {
                tables.push((
                    TABLE_CLASSICAL_TEST,
                    aggregate::classical(
                        &tested,
                        Phase::Test,
                        options.calibrate,
                        self.metric.greater_is_better(),
                    ),
                ));
            }
        }

        if options.kind.wants(LeaderboardKind::Combined) {
            let combiner = Combiner::new(Arc::clone(&self.metric), self.combiner_rounds);
            let (rows, state) =
                combiner.leaderboard(&scored, self.predictions.as_ref(), options.test)?;
            info!(
                rounds = state.selected.len(),
                combined_score = state.combined_score,
                "ensemble combination finished"
            );
            tables.push((TABLE_COMBINED, rows));
        }

        if options.kind.wants(LeaderboardKind::Times) {
            tables.push((TABLE_TIMES, times::execution_times(&scored)));
        }

        let mut written = Vec::new();
        for (name, rows) in tables {
            self.store.put_table(name, rows).await?;
            written.push(name.to_string());
        }
        info!(tables = ?written, "leaderboards replaced");
        Ok(written)
    }
}
