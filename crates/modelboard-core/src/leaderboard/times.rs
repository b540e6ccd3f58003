//! Execution-time leaderboard.
//!
//! Purely derived from the durations recorded at job completion:
//! total train + test wall time in seconds, fastest first.

use modelboard_state::{LeaderboardRow, Submission};

/// Rank submissions by total recorded execution time, ascending.
pub fn execution_times(submissions: &[Submission]) -> Vec<LeaderboardRow> {
    let mut entries: Vec<(&Submission, f64)> = submissions
        .iter()
        .map(|sub| {
            let total_ms = sub.train_duration_ms + sub.test_duration_ms;
            (sub, total_ms as f64 / 1000.0)
        })
        .collect();

    entries.sort_by(|(a, sa), (b, sb)| {
        sa.partial_cmp(sb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    entries
        .into_iter()
        .enumerate()
        .map(|(i, (sub, secs))| LeaderboardRow::new(&sub.id, secs, i as u32 + 1))
        .collect()
}
