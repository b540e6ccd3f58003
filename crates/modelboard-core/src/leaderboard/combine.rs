//! Ensemble combination: greedy forward selection over held-out fold
//! predictions.
//!
//! Every trained submission is a candidate. Starting from the empty
//! ensemble, each round adds the one candidate whose inclusion most
//! improves the combined held-out score; a candidate may be selected
//! again (implicit weighting). Selection stops after the configured
//! round limit or the first round where no candidate strictly improves
//! the score. Candidates are evaluated in identity order and ties go to
//! the first (lowest) identity, so the result is deterministic for a
//! fixed snapshot.
//!
//! A candidate must supply a prediction for every held-out fold, with
//! the same length as that fold's ground truth; otherwise it is
//! excluded from combination.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use modelboard_state::{LeaderboardRow, Submission, SubmissionId};

use crate::error::{BoardError, BoardResult};

// ---------------------------------------------------------------------------
// Metric — pluggable scoring function
// ---------------------------------------------------------------------------

/// Scoring function over aligned truth/prediction vectors.
pub trait Metric: Send + Sync {
    fn score(&self, truth: &[f64], pred: &[f64]) -> f64;

    /// Whether larger scores are better (controls sort direction and
    /// the improvement test in forward selection).
    fn greater_is_better(&self) -> bool {
        true
    }
}

/// Binary accuracy at threshold 0.5.
pub struct Accuracy;

impl Metric for Accuracy {
    fn score(&self, truth: &[f64], pred: &[f64]) -> f64 {
        if truth.is_empty() {
            return 0.0;
        }
        let correct = truth
            .iter()
            .zip(pred)
            .filter(|(t, p)| (**t >= 0.5) == (**p >= 0.5))
            .count();
        correct as f64 / truth.len() as f64
    }
}

/// Root mean squared error (lower is better).
pub struct Rmse;

impl Metric for Rmse {
    fn score(&self, truth: &[f64], pred: &[f64]) -> f64 {
        if truth.is_empty() {
            return 0.0;
        }
        let mse: f64 = truth
            .iter()
            .zip(pred)
            .map(|(t, p)| (t - p) * (t - p))
            .sum::<f64>()
            / truth.len() as f64;
        mse.sqrt()
    }

    fn greater_is_better(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// PredictionSource — where held-out predictions come from
// ---------------------------------------------------------------------------

/// Provides held-out predictions and ground truth per fold.
///
/// The ground truth defines the fold set; candidates must align with it.
pub trait PredictionSource: Send + Sync {
    /// Fold indices for which ground truth exists, ascending.
    fn folds(&self, test: bool) -> BoardResult<Vec<u32>>;

    /// Ground truth for one fold.
    fn ground_truth(&self, fold: u32, test: bool) -> BoardResult<Vec<f64>>;

    /// A submission's held-out predictions for one fold, or `None` if
    /// the submission never produced them.
    fn held_out(&self, submission: &Submission, fold: u32, test: bool)
        -> BoardResult<Option<Vec<f64>>>;
}

fn prefix(test: bool) -> &'static str {
    if test {
        "test"
    } else {
        "valid"
    }
}

/// Filesystem predictions: jobs write
/// `<submission dir>/predictions/<valid|test>_<fold>.json` and the
/// competition setup provides `<ground truth dir>/<valid|test>_<fold>.json`.
pub struct FsPredictionSource {
    ground_truth_dir: PathBuf,
}

impl FsPredictionSource {
    pub fn new(ground_truth_dir: impl Into<PathBuf>) -> Self {
        Self {
            ground_truth_dir: ground_truth_dir.into(),
        }
    }
}

impl PredictionSource for FsPredictionSource {
    fn folds(&self, test: bool) -> BoardResult<Vec<u32>> {
        let mut folds = Vec::new();
        if !self.ground_truth_dir.exists() {
            return Ok(folds);
        }
        let wanted = prefix(test);
        for entry in std::fs::read_dir(&self.ground_truth_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(rest) = name
                .strip_prefix(wanted)
                .and_then(|r| r.strip_prefix('_'))
                .and_then(|r| r.strip_suffix(".json"))
            {
                if let Ok(fold) = rest.parse() {
                    folds.push(fold);
                }
            }
        }
        folds.sort_unstable();
        Ok(folds)
    }

    fn ground_truth(&self, fold: u32, test: bool) -> BoardResult<Vec<f64>> {
        let path = self
            .ground_truth_dir
            .join(format!("{}_{fold}.json", prefix(test)));
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| BoardError::Artifact(format!("ground truth {path:?}: {e}")))
    }

    fn held_out(
        &self,
        submission: &Submission,
        fold: u32,
        test: bool,
    ) -> BoardResult<Option<Vec<f64>>> {
        let path = submission
            .path
            .join("predictions")
            .join(format!("{}_{fold}.json", prefix(test)));
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content).map_err(|e| {
                BoardError::Artifact(format!("predictions {path:?}: {e}"))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory predictions for tests.
#[derive(Default)]
pub struct MemoryPredictionSource {
    truths: BTreeMap<u32, Vec<f64>>,
    predictions: BTreeMap<(SubmissionId, u32), Vec<f64>>,
}

impl MemoryPredictionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_truth(&mut self, fold: u32, truth: Vec<f64>) {
        self.truths.insert(fold, truth);
    }

    pub fn set_prediction(&mut self, id: SubmissionId, fold: u32, pred: Vec<f64>) {
        self.predictions.insert((id, fold), pred);
    }
}

impl PredictionSource for MemoryPredictionSource {
    fn folds(&self, _test: bool) -> BoardResult<Vec<u32>> {
        Ok(self.truths.keys().copied().collect())
    }

    fn ground_truth(&self, fold: u32, _test: bool) -> BoardResult<Vec<f64>> {
        self.truths
            .get(&fold)
            .cloned()
            .ok_or_else(|| BoardError::Artifact(format!("no ground truth for fold {fold}")))
    }

    fn held_out(
        &self,
        submission: &Submission,
        fold: u32,
        _test: bool,
    ) -> BoardResult<Option<Vec<f64>>> {
        Ok(self
            .predictions
            .get(&(submission.id.clone(), fold))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Combiner — greedy forward selection
// ---------------------------------------------------------------------------

/// One fold-aligned candidate for combination.
pub struct Candidate {
    pub id: SubmissionId,
    /// Predictions per fold, same order as the fold list.
    pub fold_predictions: Vec<Vec<f64>>,
}

/// The selection sequence and its combined score. Derived and discarded
/// after each leaderboard run.
#[derive(Debug, Clone)]
pub struct CombinationState {
    pub selected: Vec<SubmissionId>,
    pub combined_score: f64,
}

/// Greedy forward-selection combiner.
pub struct Combiner {
    metric: Arc<dyn Metric>,
    max_rounds: u32,
}

impl Combiner {
    pub fn new(metric: Arc<dyn Metric>, max_rounds: u32) -> Self {
        Self { metric, max_rounds }
    }

    /// Build the contributivity leaderboard for a snapshot of scored
    /// submissions.
    pub fn leaderboard(
        &self,
        submissions: &[Submission],
        source: &dyn PredictionSource,
        test: bool,
    ) -> BoardResult<(Vec<LeaderboardRow>, CombinationState)> {
        let folds = source.folds(test)?;
        if folds.is_empty() {
            debug!("no ground truth folds, combined leaderboard empty");
            return Ok((
                Vec::new(),
                CombinationState {
                    selected: Vec::new(),
                    combined_score: 0.0,
                },
            ));
        }

        let truths: Vec<Vec<f64>> = folds
            .iter()
            .map(|&fold| source.ground_truth(fold, test))
            .collect::<BoardResult<_>>()?;

        let candidates = self.align_candidates(submissions, source, &folds, &truths, test)?;
        let state = self.forward_selection(&candidates, &truths);
        let rows = contributivity_rows(&state);
        Ok((rows, state))
    }

    /// Keep only submissions that supply a length-aligned prediction
    /// for every held-out fold, in identity order.
    fn align_candidates(
        &self,
        submissions: &[Submission],
        source: &dyn PredictionSource,
        folds: &[u32],
        truths: &[Vec<f64>],
        test: bool,
    ) -> BoardResult<Vec<Candidate>> {
        let mut sorted: Vec<&Submission> = submissions.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut candidates = Vec::new();
        'subs: for sub in sorted {
            let mut fold_predictions = Vec::with_capacity(folds.len());
            for (i, &fold) in folds.iter().enumerate() {
                match source.held_out(sub, fold, test)? {
                    Some(pred) if pred.len() == truths[i].len() => fold_predictions.push(pred),
                    Some(pred) => {
                        warn!(
                            submission = %sub.id, fold,
                            got = pred.len(), want = truths[i].len(),
                            "misaligned predictions, excluding candidate"
                        );
                        continue 'subs;
                    }
                    None => {
                        warn!(submission = %sub.id, fold, "missing predictions, excluding candidate");
                        continue 'subs;
                    }
                }
            }
            candidates.push(Candidate {
                id: sub.id.clone(),
                fold_predictions,
            });
        }
        Ok(candidates)
    }

    /// Greedy forward selection with replacement.
    pub fn forward_selection(
        &self,
        candidates: &[Candidate],
        truths: &[Vec<f64>],
    ) -> CombinationState {
        let mut state = CombinationState {
            selected: Vec::new(),
            combined_score: 0.0,
        };
        if candidates.is_empty() {
            return state;
        }

        // Running sum of selected predictions per fold; the ensemble
        // prediction is the mean over selections.
        let mut sums: Vec<Vec<f64>> = truths.iter().map(|t| vec![0.0; t.len()]).collect();
        let mut rounds = 0u32;

        while rounds < self.max_rounds {
            let k = state.selected.len() as f64;
            let mut best: Option<(usize, f64)> = None;

            for (ci, candidate) in candidates.iter().enumerate() {
                let score = self.ensemble_score(&sums, &candidate.fold_predictions, k, truths);
                // Strict improvement over the best so far; first
                // candidate wins ties (identity order).
                let improves = match best {
                    None => true,
                    Some((_, best_score)) => self.better(score, best_score),
                };
                if improves {
                    best = Some((ci, score));
                }
            }

            let (ci, score) = best.expect("candidates nonempty");
            if !state.selected.is_empty() && !self.better(score, state.combined_score) {
                break;
            }

            for (fold, pred) in candidates[ci].fold_predictions.iter().enumerate() {
                for (sum, p) in sums[fold].iter_mut().zip(pred) {
                    *sum += p;
                }
            }
            state.selected.push(candidates[ci].id.clone());
            state.combined_score = score;
            rounds += 1;
            debug!(round = rounds, candidate = %candidates[ci].id, score, "selected");
        }

        state
    }

    /// Combined score when `candidate` is added to the current sums.
    fn ensemble_score(
        &self,
        sums: &[Vec<f64>],
        candidate: &[Vec<f64>],
        k: f64,
        truths: &[Vec<f64>],
    ) -> f64 {
        let mut total = 0.0;
        for (fold, truth) in truths.iter().enumerate() {
            let combined: Vec<f64> = sums[fold]
                .iter()
                .zip(&candidate[fold])
                .map(|(sum, p)| (sum + p) / (k + 1.0))
                .collect();
            total += self.metric.score(truth, &combined);
        }
        total / truths.len() as f64
    }

    fn better(&self, a: f64, b: f64) -> bool {
        if self.metric.greater_is_better() {
            a > b
        } else {
            a < b
        }
    }
}

/// Contributivity: each contributing submission's share of the total
/// selections, sorted descending with identity tie-break.
fn contributivity_rows(state: &CombinationState) -> Vec<LeaderboardRow> {
    if state.selected.is_empty() {
        return Vec::new();
    }

    let mut counts: BTreeMap<&SubmissionId, usize> = BTreeMap::new();
    for id in &state.selected {
        *counts.entry(id).or_default() += 1;
    }
    let total = state.selected.len() as f64;

    let mut entries: Vec<(&SubmissionId, f64)> = counts
        .into_iter()
        .map(|(id, count)| (id, count as f64 / total))
        .collect();
    entries.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });

    entries
        .into_iter()
        .enumerate()
        .map(|(i, (id, share))| LeaderboardRow::new(id, share, i as u32 + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(team: &str, tag: &str) -> Submission {
        Submission::discovered(SubmissionId::new(team, tag), format!("{team}/{tag}").into())
    }

    fn candidate(team: &str, tag: &str, folds: &[&[f64]]) -> Candidate {
        Candidate {
            id: SubmissionId::new(team, tag),
            fold_predictions: folds.iter().map(|f| f.to_vec()).collect(),
        }
    }

    fn combiner(rounds: u32) -> Combiner {
        Combiner::new(Arc::new(Accuracy), rounds)
    }

    #[test]
    fn selects_best_single_candidate_first() {
        let truths = vec![vec![1.0, 1.0, 0.0, 0.0]];
        let cands = vec![
            candidate("teamA", "weak", &[&[0.9, 0.1, 0.1, 0.9]]), // 50% accurate
            candidate("teamB", "strong", &[&[0.9, 0.9, 0.1, 0.1]]), // 100% accurate
        ];

        let state = combiner(1).forward_selection(&cands, &truths);
        assert_eq!(state.selected, vec![SubmissionId::new("teamB", "strong")]);
        assert_eq!(state.combined_score, 1.0);
    }

    #[test]
    fn stops_when_no_candidate_improves() {
        let truths = vec![vec![1.0, 1.0, 0.0, 0.0]];
        let cands = vec![candidate("teamA", "perfect", &[&[1.0, 1.0, 0.0, 0.0]])];

        let state = combiner(50).forward_selection(&cands, &truths);
        // Re-selecting the perfect candidate never strictly improves.
        assert_eq!(state.selected.len(), 1);
        assert_eq!(state.combined_score, 1.0);
    }

    #[test]
    fn averaging_two_complementary_candidates_improves() {
        // Each candidate is wrong on a different half; their mean is
        // right everywhere.
        let truths = vec![vec![1.0, 1.0, 0.0, 0.0]];
        let cands = vec![
            candidate("teamA", "left", &[&[1.0, 0.4, 0.0, 0.4]]),
            candidate("teamB", "right", &[&[0.4, 1.0, 0.4, 0.0]]),
        ];

        let state = combiner(10).forward_selection(&cands, &truths);
        assert!(state.selected.len() >= 2, "both should contribute");
        assert_eq!(state.combined_score, 1.0);
    }

    #[test]
    fn score_is_monotone_in_round_limit() {
        let truths = vec![
            vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        ];
        let cands = vec![
            candidate(
                "a",
                "m1",
                &[&[0.8, 0.3, 0.6, 0.4, 0.2, 0.1], &[0.3, 0.8, 0.4, 0.6, 0.1, 0.7]],
            ),
            candidate(
                "b",
                "m2",
                &[&[0.6, 0.6, 0.7, 0.1, 0.9, 0.4], &[0.2, 0.4, 0.3, 0.9, 0.4, 0.6]],
            ),
            candidate(
                "c",
                "m3",
                &[&[0.4, 0.2, 0.9, 0.6, 0.7, 0.3], &[0.6, 0.7, 0.1, 0.4, 0.2, 0.9]],
            ),
        ];

        let mut previous = f64::NEG_INFINITY;
        for rounds in 1..=8 {
            let state = combiner(rounds).forward_selection(&cands, &truths);
            assert!(
                state.combined_score >= previous,
                "rounds={rounds}: {} < {previous}",
                state.combined_score
            );
            previous = state.combined_score;
        }
    }

    #[test]
    fn deterministic_for_fixed_snapshot() {
        let truths = vec![vec![1.0, 0.0, 1.0, 0.0]];
        let cands = vec![
            candidate("a", "m1", &[&[0.7, 0.2, 0.6, 0.3]]),
            candidate("b", "m2", &[&[0.6, 0.3, 0.7, 0.2]]),
        ];
        let s1 = combiner(5).forward_selection(&cands, &truths);
        let s2 = combiner(5).forward_selection(&cands, &truths);
        assert_eq!(s1.selected, s2.selected);
        assert_eq!(s1.combined_score, s2.combined_score);
    }

    #[test]
    fn tie_goes_to_lowest_identity() {
        let truths = vec![vec![1.0, 0.0]];
        // Identical candidates: the first in identity order must win.
        let cands = vec![
            candidate("alpha", "m", &[&[0.9, 0.1]]),
            candidate("zeta", "m", &[&[0.9, 0.1]]),
        ];
        let state = combiner(1).forward_selection(&cands, &truths);
        assert_eq!(state.selected, vec![SubmissionId::new("alpha", "m")]);
    }

    #[test]
    fn misaligned_candidates_are_excluded() {
        let mut source = MemoryPredictionSource::new();
        source.set_truth(0, vec![1.0, 0.0, 1.0]);

        let good = sub("teamA", "good");
        let short = sub("teamB", "short");
        let missing = sub("teamC", "missing");
        source.set_prediction(good.id.clone(), 0, vec![0.9, 0.1, 0.8]);
        source.set_prediction(short.id.clone(), 0, vec![0.9]);

        let c = combiner(5);
        let (rows, state) = c
            .leaderboard(&[good, short, missing], &source, false)
            .unwrap();
        assert!(!rows.is_empty());
        assert!(state.selected.iter().all(|id| id.team == "teamA"));
    }

    #[test]
    fn contributivity_shares_sum_to_one() {
        let state = CombinationState {
            selected: vec![
                SubmissionId::new("a", "m"),
                SubmissionId::new("a", "m"),
                SubmissionId::new("b", "m"),
                SubmissionId::new("a", "m"),
            ],
            combined_score: 0.9,
        };
        let rows = contributivity_rows(&state);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].team, "a");
        assert!((rows[0].score - 0.75).abs() < 1e-9);
        assert_eq!(rows[0].rank, 1);
        let total: f64 = rows.iter().map(|r| r.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rmse_direction_is_lower_better() {
        let truths = vec![vec![1.0, 0.0]];
        let cands = vec![
            candidate("a", "close", &[&[0.9, 0.1]]),
            candidate("b", "far", &[&[0.2, 0.9]]),
        ];
        let c = Combiner::new(Arc::new(Rmse), 1);
        let state = c.forward_selection(&cands, &truths);
        assert_eq!(state.selected, vec![SubmissionId::new("a", "close")]);
    }
}
