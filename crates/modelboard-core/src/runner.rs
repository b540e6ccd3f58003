//! Job execution.
//!
//! One job = one isolated OS process training or testing a single
//! (submission, fold). The command comes from the configured template;
//! on success the job must have written its score to
//! `<dir>/scores/<phase>_<fold>.json`. While the process runs, its pid
//! is registered as a live handle so an operator can cancel it.
//!
//! There is no internal watchdog: a job that never completes is detected
//! externally (its handle file stays live) and killed by the operator.

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info};

use modelboard_state::{Phase, Score, Submission};

use crate::error::{BoardError, BoardResult};
use crate::registry::JobRegistry;

/// Outcome of a single (submission, fold, phase) job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Process exited 0 and the score artifact parsed.
    Success { score: Score, duration_ms: u64 },
    /// Process exited non-zero, failed to spawn, or produced no score.
    Failure { reason: String },
    /// Process was terminated by a signal (operator cancellation).
    /// Partial results are discarded.
    Killed,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }
}

/// Executes training/testing jobs and registers their liveness handles.
pub struct JobRunner {
    registry: JobRegistry,
}

impl JobRunner {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }

    /// Run one job to completion.
    ///
    /// Errors are returned only for registry/bookkeeping failures; the
    /// job's own failure modes are all expressed as `JobOutcome` so the
    /// orchestrator can isolate them per submission.
    pub async fn run(
        &self,
        submission: &Submission,
        phase: Phase,
        fold: u32,
        template: &[String],
    ) -> BoardResult<JobOutcome> {
        if template.is_empty() {
            return Err(BoardError::Config(format!(
                "empty {phase} command template"
            )));
        }

        let command = render_template(template, submission, phase, fold);
        debug!(submission = %submission.id, %phase, fold, ?command, "spawning job");

        let start = Instant::now();
        let child = match Command::new(&command[0])
            .args(&command[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Ok(JobOutcome::Failure {
                    reason: format!("failed to spawn {}: {e}", command[0]),
                })
            }
        };

        // Register the liveness handle; removed when the guard drops.
        let _guard = match child.id() {
            Some(pid) => Some(self.registry.register(&submission.id, phase, fold, pid)?),
            None => None,
        };

        let output = child.wait_with_output().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        // A signal-terminated process has no exit code: that is a kill.
        let exit_code = match output.status.code() {
            Some(code) => code,
            None => {
                info!(submission = %submission.id, %phase, fold, "job killed");
                return Ok(JobOutcome::Killed);
            }
        };

        if exit_code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(JobOutcome::Failure {
                reason: format!("{phase} fold {fold} exited {exit_code}: {}", tail(&stderr)),
            });
        }

        match read_score(submission, phase, fold) {
            Ok(score) => {
                debug!(submission = %submission.id, %phase, fold, value = score.value, "job succeeded");
                Ok(JobOutcome::Success { score, duration_ms })
            }
            Err(reason) => Ok(JobOutcome::Failure { reason }),
        }
    }
}

/// Substitute `{dir}`, `{fold}`, `{phase}` in every template argument.
fn render_template(
    template: &[String],
    submission: &Submission,
    phase: Phase,
    fold: u32,
) -> Vec<String> {
    let dir = submission.path.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace("{dir}", &dir)
                .replace("{fold}", &fold.to_string())
                .replace("{phase}", phase.as_str())
        })
        .collect()
}

/// Read the score artifact the job was required to write.
fn read_score(submission: &Submission, phase: Phase, fold: u32) -> Result<Score, String> {
    let path = submission
        .path
        .join("scores")
        .join(format!("{phase}_{fold}.json"));
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("{phase} fold {fold}: missing score file {path:?}: {e}"))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("{phase} fold {fold}: malformed score file {path:?}: {e}"))
}

/// Last few hundred bytes of job stderr, single line, for error detail.
fn tail(stderr: &str) -> String {
    const MAX: usize = 400;
    let trimmed = stderr.trim();
    let tail = if trimmed.len() > MAX {
        // The cut must land on a char boundary or the slice panics.
        let mut start = trimmed.len() - MAX;
        while !trimmed.is_char_boundary(start) {
            start += 1;
        }
        &trimmed[start..]
    } else {
        trimmed
    };
    tail.replace('\n', " | ")
}
