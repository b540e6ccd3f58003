//! JSON-file-backed submission store.
//!
//! The whole board lives in one JSON document: submissions keyed by
//! identity plus the named leaderboard tables. Every operation reloads
//! the document under an async mutex and persists it with a
//! write-to-temp-then-rename so readers never observe a partial file.
//!
//! A missing file is an empty board; an unreadable or corrupt file is
//! `StoreError::Unavailable` and aborts the operation.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{SubmissionFilter, SubmissionMutation, SubmissionStore};
use crate::submission::{LeaderboardRow, Submission, SubmissionId};
use crate::{StoreError, StoreResult};

/// On-disk document. Submissions are keyed by `team/tag` so the file
/// stays diffable and deterministically ordered.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BoardDocument {
    submissions: BTreeMap<String, Submission>,
    tables: HashMap<String, Vec<LeaderboardRow>>,
}

/// JSON-file-backed implementation of [`SubmissionStore`].
pub struct JsonSubmissionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles across concurrent callers.
    lock: Mutex<()>,
}

impl JsonSubmissionStore {
    /// Open (or lazily create) the store at `path`. The parent directory
    /// is created eagerly so the first write cannot fail on a missing dir.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    fn load(&self) -> StoreResult<BoardDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StoreError::Unavailable(format!("corrupt store file {:?}: {e}", self.path))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BoardDocument::default()),
            Err(e) => Err(StoreError::Unavailable(format!(
                "cannot read store file {:?}: {e}",
                self.path
            ))),
        }
    }

    fn save(&self, doc: &BoardDocument) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(doc)?;
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // Atomic replace: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(path = ?self.path, "store persisted");
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for JsonSubmissionStore {
    async fn insert(&self, submission: Submission) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load()?;
        let key = submission.id.to_string();
        if doc.submissions.contains_key(&key) {
            return Err(StoreError::Duplicate {
                team: submission.id.team.clone(),
                tag: submission.id.tag.clone(),
            });
        }
        doc.submissions.insert(key, submission);
        self.save(&doc)
    }

    async fn get(&self, filter: &SubmissionFilter) -> StoreResult<Vec<Submission>> {
        let _guard = self.lock.lock().await;
        let doc = self.load()?;
        let mut subs: Vec<Submission> = doc
            .submissions
            .into_values()
            .filter(|s| filter.matches(s))
            .collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subs)
    }

    async fn get_by_id(&self, id: &SubmissionId) -> StoreResult<Option<Submission>> {
        let _guard = self.lock.lock().await;
        let doc = self.load()?;
        Ok(doc.submissions.get(&id.to_string()).cloned())
    }

    async fn apply(
        &self,
        ids: &[SubmissionId],
        mutation: &SubmissionMutation,
    ) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load()?;
        let mut applied = 0;
        for id in ids {
            if let Some(sub) = doc.submissions.get_mut(&id.to_string()) {
                if let Some(expected) = mutation.expect_state {
                    if sub.state != expected {
                        continue;
                    }
                }
                mutation.apply_to(sub);
                applied += 1;
            }
        }
        if applied > 0 {
            self.save(&doc)?;
        }
        Ok(applied)
    }

    async fn put_table(&self, name: &str, rows: Vec<LeaderboardRow>) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load()?;
        doc.tables.insert(name.to_string(), rows);
        self.save(&doc)
    }

    async fn get_table(&self, name: &str) -> StoreResult<Vec<LeaderboardRow>> {
        let _guard = self.lock.lock().await;
        let doc = self.load()?;
        Ok(doc.tables.get(name).cloned().unwrap_or_default())
    }
}
