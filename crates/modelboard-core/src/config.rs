//! Board configuration.
//!
//! One JSON document, all fields defaulted, with a small set of
//! environment overrides kept for operator compatibility:
//! `FETCH_DELAY` (repeat-fetch polling delay), `SERV_PORT` and `DEBUGLB`
//! (consumed by the serving layer, not by the core).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BoardError, BoardResult};

/// Configuration for a competition round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Root working directory; all relative layout hangs off this.
    pub root_dir: PathBuf,

    /// Number of CV folds every submission is trained/tested on.
    pub folds: u32,

    /// Training command template. Placeholders: `{dir}` (submission
    /// directory), `{fold}`, `{phase}`. The job must write
    /// `<dir>/scores/<phase>_<fold>.json` on success.
    pub train_command: Vec<String>,

    /// Testing command template, same placeholders and score contract.
    pub test_command: Vec<String>,

    /// Maximum submissions processed concurrently in one batch.
    pub max_concurrency: usize,

    /// Forward-selection round limit for the combined leaderboard.
    pub combiner_rounds: u32,

    /// Delay between fetches when polling (seconds).
    pub fetch_delay_secs: u64,

    /// Listen port for the serving layer.
    pub server_port: u16,

    /// Debug/production toggle for the serving layer.
    pub debug: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            folds: 2,
            train_command: vec![
                "python".to_string(),
                "train.py".to_string(),
                "--dir".to_string(),
                "{dir}".to_string(),
                "--fold".to_string(),
                "{fold}".to_string(),
            ],
            test_command: vec![
                "python".to_string(),
                "test.py".to_string(),
                "--dir".to_string(),
                "{dir}".to_string(),
                "--fold".to_string(),
                "{fold}".to_string(),
            ],
            max_concurrency: 4,
            combiner_rounds: 20,
            fetch_delay_secs: 60,
            server_port: 8080,
            debug: false,
        }
    }
}

impl BoardConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: &Path) -> BoardResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BoardError::Config(format!("cannot read config {path:?}: {e}")))?;
        let mut config: BoardConfig = serde_json::from_str(&content)
            .map_err(|e| BoardError::Config(format!("invalid config {path:?}: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults rooted at `root_dir`, with environment overrides.
    pub fn rooted(root_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            root_dir: root_dir.into(),
            ..Self::default()
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(delay) = std::env::var("FETCH_DELAY") {
            match delay.parse() {
                Ok(secs) => self.fetch_delay_secs = secs,
                Err(_) => warn!(value = %delay, "ignoring unparseable FETCH_DELAY"),
            }
        }
        if let Ok(port) = std::env::var("SERV_PORT") {
            match port.parse() {
                Ok(p) => self.server_port = p,
                Err(_) => warn!(value = %port, "ignoring unparseable SERV_PORT"),
            }
        }
        if let Ok(flag) = std::env::var("DEBUGLB") {
            // A non-empty, non-zero value means debug.
            self.debug = flag.parse::<i64>().map(|v| v != 0).unwrap_or(!flag.is_empty());
        }
    }

    /// Team repositories scanned by the fetcher.
    pub fn repos_dir(&self) -> PathBuf {
        self.root_dir.join("repos")
    }

    /// Live job-handle registry location.
    pub fn jobs_dir(&self) -> PathBuf {
        self.root_dir.join("jobs")
    }

    /// Held-out ground truth per fold.
    pub fn ground_truth_dir(&self) -> PathBuf {
        self.root_dir.join("ground_truth")
    }

    /// The JSON store document.
    pub fn store_path(&self) -> PathBuf {
        self.root_dir.join("board.json")
    }

    /// Command template for the given phase.
    pub fn command_for(&self, phase: modelboard_state::Phase) -> &[String] {
        match phase {
            modelboard_state::Phase::Train => &self.train_command,
            modelboard_state::Phase::Test => &self.test_command,
        }
    }
}
