//! Submission discovery.
//!
//! Teams push candidate models into `repos/<team>/<tag>/`. The fetcher
//! scans that layout and inserts every identity not yet known to the
//! store as a `new` submission. Already-known identities are left
//! untouched, so fetch is safe to run repeatedly (and is run in a loop
//! by `modelboard fetch --repeat`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use modelboard_state::{StoreError, Submission, SubmissionId, SubmissionStore};

use crate::error::BoardResult;

/// Outcome of one fetch pass.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Identities inserted as `new` this pass.
    pub discovered: Vec<SubmissionId>,
    /// Identities seen on disk but already present in the store.
    pub already_known: usize,
}

/// Scans team repositories for new submissions.
pub struct Fetcher {
    repos_dir: PathBuf,
    store: Arc<dyn SubmissionStore>,
}

impl Fetcher {
    pub fn new(repos_dir: impl Into<PathBuf>, store: Arc<dyn SubmissionStore>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            store,
        }
    }

    /// Run one discovery pass.
    pub async fn fetch(&self) -> BoardResult<FetchReport> {
        let mut report = FetchReport::default();

        if !self.repos_dir.exists() {
            info!(repos = ?self.repos_dir, "repos directory missing, nothing to fetch");
            return Ok(report);
        }

        for (id, path) in scan_repos(&self.repos_dir)? {
            match self.store.insert(Submission::discovered(id.clone(), path)).await {
                Ok(()) => {
                    info!(submission = %id, "discovered new submission");
                    report.discovered.push(id);
                }
                Err(StoreError::Duplicate { .. }) => {
                    debug!(submission = %id, "already known");
                    report.already_known += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(report)
    }
}

/// Enumerate `<repos>/<team>/<tag>` directory pairs, identity-ordered.
/// Hidden entries and stray files are skipped.
fn scan_repos(repos_dir: &Path) -> BoardResult<Vec<(SubmissionId, PathBuf)>> {
    let mut found = Vec::new();

    for team_entry in std::fs::read_dir(repos_dir)? {
        let team_entry = team_entry?;
        if !team_entry.file_type()?.is_dir() {
            continue;
        }
        let team = team_entry.file_name().to_string_lossy().to_string();
        if team.starts_with('.') {
            continue;
        }

        for tag_entry in std::fs::read_dir(team_entry.path())? {
            let tag_entry = tag_entry?;
            if !tag_entry.file_type()?.is_dir() {
                continue;
            }
            let tag = tag_entry.file_name().to_string_lossy().to_string();
            if tag.starts_with('.') {
                continue;
            }

            found.push((SubmissionId::new(team.clone(), tag), tag_entry.path()));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelboard_state::{MemorySubmissionStore, SubmissionFilter, SubmissionState};

    fn seed_repo(root: &Path, team: &str, tag: &str) {
        std::fs::create_dir_all(root.join(team).join(tag)).unwrap();
    }

    #[tokio::test]
    async fn discovers_new_submissions_as_new() {
        let dir = tempfile::tempdir().unwrap();
        seed_repo(dir.path(), "teamA", "model1");
        seed_repo(dir.path(), "teamB", "model2");

        let store: Arc<dyn SubmissionStore> = Arc::new(MemorySubmissionStore::new());
        let fetcher = Fetcher::new(dir.path(), Arc::clone(&store));

        let report = fetcher.fetch().await.unwrap();
        assert_eq!(report.discovered.len(), 2);
        assert_eq!(report.already_known, 0);

        let subs = store.get(&SubmissionFilter::all()).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.state == SubmissionState::New));
    }

    #[tokio::test]
    async fn refetch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        seed_repo(dir.path(), "teamA", "model1");

        let store: Arc<dyn SubmissionStore> = Arc::new(MemorySubmissionStore::new());
        let fetcher = Fetcher::new(dir.path(), Arc::clone(&store));

        fetcher.fetch().await.unwrap();
        let second = fetcher.fetch().await.unwrap();
        assert!(second.discovered.is_empty());
        assert_eq!(second.already_known, 1);

        let subs = store.get(&SubmissionFilter::all()).await.unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn hidden_and_file_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        seed_repo(dir.path(), "teamA", "model1");
        seed_repo(dir.path(), ".git", "objects");
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        std::fs::write(dir.path().join("teamA").join("notes.txt"), "hi").unwrap();

        let store: Arc<dyn SubmissionStore> = Arc::new(MemorySubmissionStore::new());
        let fetcher = Fetcher::new(dir.path(), Arc::clone(&store));

        let report = fetcher.fetch().await.unwrap();
        assert_eq!(report.discovered.len(), 1);
        assert_eq!(report.discovered[0], SubmissionId::new("teamA", "model1"));
    }

    #[tokio::test]
    async fn missing_repos_dir_is_empty_report() {
        let store: Arc<dyn SubmissionStore> = Arc::new(MemorySubmissionStore::new());
        let fetcher = Fetcher::new("/nonexistent/repos", store);
        let report = fetcher.fetch().await.unwrap();
        assert!(report.discovered.is_empty());
    }
}
