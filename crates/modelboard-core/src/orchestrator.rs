//! Batch orchestration of training and testing.
//!
//! A batch resolves a selector to a submission set, runs every fold job
//! for each selected submission, and commits the resulting transition
//! through one compare-and-set `apply` per submission. Submissions are
//! processed concurrently (bounded); within one submission all fold
//! jobs complete before its state is committed.
//!
//! Dispatch is at-least-once, commit is at-most-once: each submission
//! is re-read immediately before its jobs run, and the commit expects
//! the state observed at that re-read. A submission moved by a
//! concurrent pass fails the CAS and is reported as skipped, never
//! double-committed. A crash mid-batch leaves committed submissions in
//! their new state and undispatched ones untouched; re-running the
//! batch is safe because selection re-reads current state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use modelboard_state::{
    Phase, Score, Submission, SubmissionFilter, SubmissionId, SubmissionMutation, SubmissionState,
    SubmissionStore,
};

use crate::config::BoardConfig;
use crate::error::{BoardError, BoardResult};
use crate::runner::{JobOutcome, JobRunner};

/// How a batch selects its submissions.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Submissions currently in this exact state.
    ByState(SubmissionState),
    /// Every submission regardless of state.
    All,
    /// Submissions whose tag contains the substring, regardless of
    /// state. Errors with `NoModelFound` when nothing matches.
    ByTagAll(String),
}

impl Selector {
    fn to_filter(&self) -> SubmissionFilter {
        match self {
            Selector::ByState(state) => SubmissionFilter::by_state(*state),
            Selector::All => SubmissionFilter::all(),
            Selector::ByTagAll(tag) => SubmissionFilter::by_tag(tag.clone()),
        }
    }
}

/// What a batch does with each submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Train,
    Test,
    /// Train, then immediately test the same submission on success,
    /// without a second selection pass.
    TrainThenTest,
}

/// Per-identity outcome summary of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Submissions whose transition committed.
    pub completed: Vec<SubmissionId>,
    /// Submissions that moved to `error`, with detail.
    pub failed: Vec<(SubmissionId, String)>,
    /// Submissions skipped because a concurrent pass moved them first.
    pub skipped: Vec<SubmissionId>,
}

enum PhaseRun {
    Succeeded {
        scores: BTreeMap<u32, Score>,
        duration_ms: u64,
    },
    Failed {
        reason: String,
    },
}

enum SubmissionOutcome {
    Completed(SubmissionId),
    Failed(SubmissionId, String),
    Skipped(SubmissionId),
}

/// Drives submissions through the state machine.
pub struct Orchestrator {
    store: Arc<dyn SubmissionStore>,
    runner: Arc<JobRunner>,
    config: BoardConfig,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn SubmissionStore>, runner: JobRunner, config: BoardConfig) -> Self {
        Self {
            store,
            runner: Arc::new(runner),
            config,
        }
    }

    /// Run one batch. Failures local to a submission are recorded on it
    /// and reported; only store unavailability aborts the batch.
    pub async fn run_batch(
        &self,
        phase: BatchPhase,
        selector: &Selector,
    ) -> BoardResult<BatchReport> {
        let selected = self.store.get(&selector.to_filter()).await?;

        if selected.is_empty() {
            if let Selector::ByTagAll(tag) = selector {
                return Err(BoardError::NoModelFound { tag: tag.clone() });
            }
            info!("batch selected no submissions");
            return Ok(BatchReport::default());
        }

        info!(count = selected.len(), ?phase, "starting batch");

        let outcomes: Vec<BoardResult<SubmissionOutcome>> = stream::iter(selected)
            .map(|sub| {
                let selector = selector.clone();
                async move { self.process_submission(sub.id, phase, &selector).await }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome? {
                SubmissionOutcome::Completed(id) => report.completed.push(id),
                SubmissionOutcome::Failed(id, reason) => report.failed.push((id, reason)),
                SubmissionOutcome::Skipped(id) => report.skipped.push(id),
            }
        }
        report.completed.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report.skipped.sort();

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "batch finished"
        );
        Ok(report)
    }

    /// Bulk operator transition of every submission in `from` to `to`.
    /// Returns the number of submissions moved.
    pub async fn change_state(
        &self,
        from: SubmissionState,
        to: SubmissionState,
    ) -> BoardResult<usize> {
        let selected = self.store.get(&SubmissionFilter::by_state(from)).await?;
        let ids: Vec<SubmissionId> = selected.into_iter().map(|s| s.id).collect();
        let moved = self
            .store
            .apply(&ids, &SubmissionMutation::transition(from, to))
            .await?;
        info!(%from, %to, moved, "bulk state change");
        Ok(moved)
    }

    /// Single-submission operator override. The tag matches as a
    /// substring within the team, so it can be ambiguous.
    pub async fn set_state(
        &self,
        team: &str,
        tag: &str,
        state: SubmissionState,
    ) -> BoardResult<SubmissionId> {
        let matches: Vec<Submission> = self
            .store
            .get(&SubmissionFilter::by_tag(tag))
            .await?
            .into_iter()
            .filter(|s| s.id.team == team)
            .collect();

        match matches.len() {
            0 => Err(BoardError::NoModelFound {
                tag: format!("{team}/{tag}"),
            }),
            1 => {
                let id = matches[0].id.clone();
                self.store
                    .apply(
                        std::slice::from_ref(&id),
                        &SubmissionMutation::state(state),
                    )
                    .await?;
                info!(submission = %id, %state, "operator state override");
                Ok(id)
            }
            n => Err(BoardError::AmbiguousSelection { matches: n }),
        }
    }

    // -- per-submission pipeline --------------------------------------------

    async fn process_submission(
        &self,
        id: SubmissionId,
        phase: BatchPhase,
        selector: &Selector,
    ) -> BoardResult<SubmissionOutcome> {
        // Re-validate: the record is re-read immediately before dispatch
        // and the commit targets exactly this identity at this state.
        let Some(sub) = self.store.get_by_id(&id).await? else {
            return Ok(SubmissionOutcome::Skipped(id));
        };
        if let Selector::ByState(state) = selector {
            if sub.state != *state {
                return Ok(SubmissionOutcome::Skipped(id));
            }
        }

        match phase {
            BatchPhase::Train => self.run_phase_and_commit(sub, Phase::Train).await,
            BatchPhase::Test => self.run_phase_and_commit(sub, Phase::Test).await,
            BatchPhase::TrainThenTest => {
                match self.run_phase_and_commit(sub, Phase::Train).await? {
                    SubmissionOutcome::Completed(id) => {
                        // Pipeline straight into testing; the train
                        // commit left the record in `trained`.
                        let Some(sub) = self.store.get_by_id(&id).await? else {
                            return Ok(SubmissionOutcome::Skipped(id));
                        };
                        if sub.state != SubmissionState::Trained {
                            return Ok(SubmissionOutcome::Skipped(id));
                        }
                        self.run_phase_and_commit(sub, Phase::Test).await
                    }
                    other => Ok(other),
                }
            }
        }
    }

    /// Run all fold jobs for one phase, then commit the transition.
    async fn run_phase_and_commit(
        &self,
        sub: Submission,
        phase: Phase,
    ) -> BoardResult<SubmissionOutcome> {
        let observed_state = sub.state;
        let run = self.run_fold_jobs(&sub, phase).await?;

        let mutation = match &run {
            PhaseRun::Succeeded { scores, duration_ms } => {
                let now = Utc::now();
                let mut m = SubmissionMutation::transition(observed_state, target_state(phase));
                m.set_error = Some(None);
                match phase {
                    Phase::Train => {
                        m.set_train_scores = Some(scores.clone());
                        m.set_trained_at = Some(now);
                        m.set_train_duration_ms = Some(*duration_ms);
                    }
                    Phase::Test => {
                        m.set_test_scores = Some(scores.clone());
                        m.set_tested_at = Some(now);
                        m.set_test_duration_ms = Some(*duration_ms);
                    }
                }
                m
            }
            PhaseRun::Failed { reason } => {
                let mut m =
                    SubmissionMutation::transition(observed_state, SubmissionState::Error);
                m.set_error = Some(Some(reason.clone()));
                m
            }
        };

        let applied = self
            .store
            .apply(std::slice::from_ref(&sub.id), &mutation)
            .await?;
        if applied == 0 {
            // A concurrent pass moved this record between our re-read
            // and the commit; its jobs ran for nothing but no state
            // was double-committed.
            warn!(submission = %sub.id, "commit skipped, record moved concurrently");
            return Ok(SubmissionOutcome::Skipped(sub.id));
        }

        match run {
            PhaseRun::Succeeded { .. } => {
                info!(submission = %sub.id, %phase, "transition committed");
                Ok(SubmissionOutcome::Completed(sub.id))
            }
            PhaseRun::Failed { reason } => {
                warn!(submission = %sub.id, %phase, %reason, "submission errored");
                Ok(SubmissionOutcome::Failed(sub.id, reason))
            }
        }
    }

    /// Run one job per fold, concurrently, joining all before returning.
    /// A killed job is treated exactly as a failure.
    async fn run_fold_jobs(&self, sub: &Submission, phase: Phase) -> BoardResult<PhaseRun> {
        let template = self.config.command_for(phase);

        let jobs = (0..self.config.folds).map(|fold| {
            let runner = Arc::clone(&self.runner);
            async move { (fold, runner.run(sub, phase, fold, template).await) }
        });
        let results = futures::future::join_all(jobs).await;

        let mut scores = BTreeMap::new();
        let mut duration_ms = 0u64;
        let mut failure: Option<String> = None;

        for (fold, result) in results {
            match result {
                Ok(JobOutcome::Success { score, duration_ms: ms }) => {
                    scores.insert(fold, score);
                    duration_ms += ms;
                }
                Ok(JobOutcome::Failure { reason }) => {
                    failure.get_or_insert(reason);
                }
                Ok(JobOutcome::Killed) => {
                    failure.get_or_insert(format!("{phase} fold {fold} killed by operator"));
                }
                // Only the store aborts a batch; runner bookkeeping
                // failures stay local to this submission.
                Err(e @ BoardError::Store(_)) => return Err(e),
                Err(e) => {
                    failure.get_or_insert(format!("{phase} fold {fold}: {e}"));
                }
            }
        }

        Ok(match failure {
            None => PhaseRun::Succeeded { scores, duration_ms },
            Some(reason) => PhaseRun::Failed { reason },
        })
    }
}

fn target_state(phase: Phase) -> SubmissionState {
    match phase {
        Phase::Train => SubmissionState::Trained,
        Phase::Test => SubmissionState::Tested,
    }
}
