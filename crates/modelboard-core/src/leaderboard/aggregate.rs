//! Classical leaderboard: each submission ranked by its own aggregate
//! fold score.
//!
//! Pure with respect to the snapshot: identical score sets always yield
//! identical ranks and aggregates, with ties broken by identity order.

use modelboard_state::{LeaderboardRow, Phase, Submission};

/// Aggregate per-fold scores into one value per submission and rank.
///
/// The aggregate is the mean over folds, using the calibrated variant
/// when `calibrate` is set and present. Submissions with no recorded
/// scores for the phase are excluded. Sort direction follows the
/// metric (`greater_is_better`).
pub fn classical(
    submissions: &[Submission],
    phase: Phase,
    calibrate: bool,
    greater_is_better: bool,
) -> Vec<LeaderboardRow> {
    let mut entries: Vec<(&Submission, f64)> = submissions
        .iter()
        .filter_map(|sub| {
            let scores = sub.scores(phase);
            if scores.is_empty() {
                return None;
            }
            let sum: f64 = scores.values().map(|s| s.effective(calibrate)).sum();
            Some((sub, sum / scores.len() as f64))
        })
        .collect();

    entries.sort_by(|(a, sa), (b, sb)| {
        let ord = if greater_is_better {
            sb.partial_cmp(sa)
        } else {
            sa.partial_cmp(sb)
        };
        ord.unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    entries
        .into_iter()
        .enumerate()
        .map(|(i, (sub, score))| LeaderboardRow::new(&sub.id, score, i as u32 + 1))
        .collect()
}
