//! Modelboard Core - submission lifecycle and leaderboards
//!
//! Provides the pipeline that takes a team submission from discovery to
//! the leaderboards:
//! - Discovers new submissions in team repositories (fetch)
//! - Trains and tests them per CV fold as isolated, killable processes
//! - Commits state transitions through compare-and-set store updates
//! - Ranks submissions individually and by ensemble contributivity

pub mod config;
pub mod error;
pub mod fetch;
pub mod leaderboard;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod telemetry;

// Re-export key types
pub use config::BoardConfig;
pub use error::{BoardError, BoardResult};
pub use fetch::{FetchReport, Fetcher};
pub use leaderboard::{LeaderboardEngine, LeaderboardKind, LeaderboardOptions};
pub use orchestrator::{BatchPhase, BatchReport, Orchestrator, Selector};
pub use registry::{JobHandle, JobRegistry};
pub use runner::{JobOutcome, JobRunner};
