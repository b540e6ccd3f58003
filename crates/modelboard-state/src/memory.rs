//! In-memory store (testing only)
//!
//! `MemorySubmissionStore` satisfies the `SubmissionStore` contract with
//! a mutex-guarded map and no external dependencies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::{SubmissionFilter, SubmissionMutation, SubmissionStore};
use crate::submission::{LeaderboardRow, Submission, SubmissionId};
use crate::{StoreError, StoreResult};

/// In-memory submission store backed by `Mutex<HashMap>`.
#[derive(Debug, Default)]
pub struct MemorySubmissionStore {
    submissions: Mutex<BTreeMap<SubmissionId, Submission>>,
    tables: Mutex<HashMap<String, Vec<LeaderboardRow>>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn insert(&self, submission: Submission) -> StoreResult<()> {
        let mut subs = self.submissions.lock().unwrap();
        if subs.contains_key(&submission.id) {
            return Err(StoreError::Duplicate {
                team: submission.id.team.clone(),
                tag: submission.id.tag.clone(),
            });
        }
        subs.insert(submission.id.clone(), submission);
        Ok(())
    }

    async fn get(&self, filter: &SubmissionFilter) -> StoreResult<Vec<Submission>> {
        let subs = self.submissions.lock().unwrap();
        Ok(subs
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: &SubmissionId) -> StoreResult<Option<Submission>> {
        let subs = self.submissions.lock().unwrap();
        Ok(subs.get(id).cloned())
    }

    async fn apply(
        &self,
        ids: &[SubmissionId],
        mutation: &SubmissionMutation,
    ) -> StoreResult<usize> {
        let mut subs = self.submissions.lock().unwrap();
        let mut applied = 0;
        for id in ids {
            if let Some(sub) = subs.get_mut(id) {
                if let Some(expected) = mutation.expect_state {
                    if sub.state != expected {
                        continue;
                    }
                }
                mutation.apply_to(sub);
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn put_table(&self, name: &str, rows: Vec<LeaderboardRow>) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.insert(name.to_string(), rows);
        Ok(())
    }

    async fn get_table(&self, name: &str) -> StoreResult<Vec<LeaderboardRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.get(name).cloned().unwrap_or_default())
    }
}
