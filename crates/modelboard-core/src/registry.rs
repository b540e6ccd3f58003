//! Live job-handle registry.
//!
//! Every running job registers a handle file under
//! `jobs/<team>/<uid>/<phase>_<fold>.json` holding its pid, and removes
//! it when the job finishes (the guard drops). An operator cancels a
//! submission's jobs by enumerating that directory: each pid gets a
//! graceful terminate, a short grace period, then a forced kill.
//! Termination is non-graceful from the job's point of view — partial
//! results are discarded, never scored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use modelboard_state::{Phase, SubmissionId};

use crate::error::BoardResult;

/// One live-job handle as persisted in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub team: String,
    pub tag: String,
    pub phase: Phase,
    pub fold: u32,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Removes the handle file when the job finishes.
#[derive(Debug)]
pub struct HandleGuard {
    path: PathBuf,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "failed to remove job handle");
            }
        }
    }
}

/// File-backed registry of live job handles.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs_dir: PathBuf,
    grace: Duration,
}

impl JobRegistry {
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            grace: Duration::from_secs(2),
        }
    }

    /// Override the terminate-to-kill grace period (tests).
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn identity_dir(&self, id: &SubmissionId) -> PathBuf {
        self.jobs_dir.join(&id.team).join(id.uid())
    }

    /// Record a live job. The returned guard removes the handle file on drop.
    pub fn register(
        &self,
        id: &SubmissionId,
        phase: Phase,
        fold: u32,
        pid: u32,
    ) -> BoardResult<HandleGuard> {
        let dir = self.identity_dir(id);
        std::fs::create_dir_all(&dir)?;

        let handle = JobHandle {
            team: id.team.clone(),
            tag: id.tag.clone(),
            phase,
            fold,
            pid,
            started_at: Utc::now(),
        };
        let path = dir.join(format!("{phase}_{fold}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&handle)?)?;
        Ok(HandleGuard { path })
    }

    /// Enumerate live handles for an identity. Unreadable files are skipped.
    pub fn live_handles(&self, id: &SubmissionId) -> BoardResult<Vec<JobHandle>> {
        let dir = self.identity_dir(id);
        let mut handles = Vec::new();
        if !dir.exists() {
            return Ok(handles);
        }
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match read_handle(&path) {
                    Ok(handle) => handles.push(handle),
                    Err(e) => warn!(path = ?path, error = %e, "skipping unreadable job handle"),
                }
            }
        }
        handles.sort_by_key(|h| (h.phase.as_str(), h.fold));
        Ok(handles)
    }

    /// Terminate all live jobs for an identity: graceful terminate, grace
    /// period, then forced kill for survivors. Returns the number of
    /// processes signaled; zero handles is a no-op.
    pub async fn kill_all(&self, id: &SubmissionId) -> BoardResult<usize> {
        let handles = self.live_handles(id)?;
        if handles.is_empty() {
            info!(submission = %id, "no live jobs to kill");
            return Ok(0);
        }

        let mut signaled = 0;
        for handle in &handles {
            if signal(handle.pid, "-TERM").await {
                info!(submission = %id, pid = handle.pid, fold = handle.fold, "sent SIGTERM");
                signaled += 1;
            }
        }

        tokio::time::sleep(self.grace).await;

        for handle in &handles {
            if is_alive(handle.pid).await {
                warn!(submission = %id, pid = handle.pid, "still alive after grace, sending SIGKILL");
                signal(handle.pid, "-KILL").await;
            }
        }

        Ok(signaled)
    }
}

fn read_handle(path: &Path) -> BoardResult<JobHandle> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Send a signal via the system `kill` binary. True if it was delivered.
async fn signal(pid: u32, sig: &str) -> bool {
    Command::new("kill")
        .arg(sig)
        .arg(pid.to_string())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn is_alive(pid: u32) -> bool {
    signal(pid, "-0").await
}
