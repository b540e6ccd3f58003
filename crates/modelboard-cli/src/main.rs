//! Modelboard - competition submission pipeline CLI
//!
//! The `modelboard` command operates a competition round end to end:
//!
//! - `fetch`: discover new team submissions
//! - `train` / `test` / `train-test`: run batches through the state machine
//! - `leaderboard`: recompute the ranking tables
//! - `change-state` / `set-state`: operator state overrides
//! - `kill`: cancel a submission's live jobs

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use modelboard_core::leaderboard::{Accuracy, FsPredictionSource, Metric, Rmse};
use modelboard_core::{
    BatchPhase, BoardConfig, Fetcher, JobRegistry, JobRunner, LeaderboardEngine, LeaderboardKind,
    LeaderboardOptions, Orchestrator, Selector,
};
use modelboard_state::{
    JsonSubmissionStore, SubmissionFilter, SubmissionId, SubmissionState, SubmissionStore,
    TABLE_CLASSICAL, TABLE_CLASSICAL_TEST, TABLE_COMBINED, TABLE_TIMES,
};

#[derive(Parser)]
#[command(name = "modelboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Competitive model submission pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Board root directory (store, repos, jobs, ground truth)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Optional config file (JSON); defaults hang off --root
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the board directory layout and an empty store
    Init,

    /// Discover new submissions from team repositories
    Fetch {
        /// Keep fetching in a loop
        #[arg(long)]
        repeat: bool,

        /// Seconds between fetches (overrides config and FETCH_DELAY)
        #[arg(long)]
        delay: Option<u64>,
    },

    /// Train selected submissions (default: state `new`)
    Train {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Test selected submissions (default: state `trained`)
    Test {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Train then immediately test selected submissions (default: state `new`)
    TrainTest {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Recompute leaderboard tables
    Leaderboard {
        /// Which table(s) to recompute
        #[arg(long, value_enum, default_value_t = WhichLeaderboard::All)]
        which: WhichLeaderboard,

        /// Also compute held-out-test variants
        #[arg(long)]
        test: bool,

        /// Use calibrated score variants where present
        #[arg(long)]
        calibrate: bool,

        /// Scoring metric for sort direction and combination
        #[arg(long, value_enum, default_value_t = MetricChoice::Accuracy)]
        metric: MetricChoice,
    },

    /// Move every submission in one state to another
    ChangeState {
        /// Source state
        from: SubmissionState,
        /// Target state
        to: SubmissionState,
    },

    /// Override the state of a single submission
    SetState {
        team: String,
        tag: String,
        state: SubmissionState,
    },

    /// Cancel all live jobs for a submission
    Kill {
        team: String,
        tag: String,

        /// Skip the interactive confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the submissions table or a leaderboard table
    PrintDb {
        /// Table name (default: submissions)
        #[arg(long)]
        table: Option<String>,

        /// Restrict submissions to this state
        #[arg(long)]
        state: Option<SubmissionState>,
    },
}

/// Shared selection flags for the batch commands.
#[derive(clap::Args)]
struct SelectionArgs {
    /// Select by state (`new`, `trained`, `tested`, `error`, or `all`)
    #[arg(long)]
    state: Option<String>,

    /// Select by tag substring, regardless of state
    #[arg(long)]
    tag: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WhichLeaderboard {
    All,
    Classical,
    Combined,
    Times,
}

impl From<WhichLeaderboard> for LeaderboardKind {
    fn from(which: WhichLeaderboard) -> Self {
        match which {
            WhichLeaderboard::All => LeaderboardKind::All,
            WhichLeaderboard::Classical => LeaderboardKind::Classical,
            WhichLeaderboard::Combined => LeaderboardKind::Combined,
            WhichLeaderboard::Times => LeaderboardKind::Times,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricChoice {
    Accuracy,
    Rmse,
}

impl MetricChoice {
    fn metric(self) -> Arc<dyn Metric> {
        match self {
            MetricChoice::Accuracy => Arc::new(Accuracy),
            MetricChoice::Rmse => Arc::new(Rmse),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    modelboard_core::telemetry::init_tracing(cli.json, level);

    let config = match &cli.config {
        Some(path) => BoardConfig::load(path)
            .with_context(|| format!("failed to load config {path:?}"))?,
        None => BoardConfig::rooted(&cli.root),
    };

    let store: Arc<dyn SubmissionStore> = Arc::new(
        JsonSubmissionStore::open(config.store_path()).context("failed to open the board store")?,
    );

    match cli.command {
        Commands::Init => cmd_init(&config, store.as_ref()).await,
        Commands::Fetch { repeat, delay } => cmd_fetch(&config, store, repeat, delay).await,
        Commands::Train { selection } => {
            cmd_batch(&config, store, BatchPhase::Train, selection, SubmissionState::New).await
        }
        Commands::Test { selection } => {
            cmd_batch(
                &config,
                store,
                BatchPhase::Test,
                selection,
                SubmissionState::Trained,
            )
            .await
        }
        Commands::TrainTest { selection } => {
            cmd_batch(
                &config,
                store,
                BatchPhase::TrainThenTest,
                selection,
                SubmissionState::New,
            )
            .await
        }
        Commands::Leaderboard {
            which,
            test,
            calibrate,
            metric,
        } => cmd_leaderboard(&config, store, which, test, calibrate, metric).await,
        Commands::ChangeState { from, to } => cmd_change_state(&config, store, from, to).await,
        Commands::SetState { team, tag, state } => {
            cmd_set_state(&config, store, &team, &tag, state).await
        }
        Commands::Kill { team, tag, yes } => cmd_kill(&config, &team, &tag, yes).await,
        Commands::PrintDb { table, state } => cmd_print_db(store.as_ref(), table, state).await,
    }
}

fn orchestrator(config: &BoardConfig, store: Arc<dyn SubmissionStore>) -> Orchestrator {
    let runner = JobRunner::new(JobRegistry::new(config.jobs_dir()));
    Orchestrator::new(store, runner, config.clone())
}

/// Resolve `--state`/`--tag` flags; a tag filter forces all-states.
fn selector(selection: &SelectionArgs, default_state: SubmissionState) -> Result<Selector> {
    if let Some(tag) = &selection.tag {
        return Ok(Selector::ByTagAll(tag.clone()));
    }
    match selection.state.as_deref() {
        None => Ok(Selector::ByState(default_state)),
        Some("all") => Ok(Selector::All),
        Some(name) => {
            let state = name
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("invalid --state")?;
            Ok(Selector::ByState(state))
        }
    }
}

async fn cmd_init(config: &BoardConfig, store: &dyn SubmissionStore) -> Result<()> {
    for dir in [
        config.repos_dir(),
        config.jobs_dir(),
        config.ground_truth_dir(),
    ] {
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir:?}"))?;
    }
    for table in [TABLE_CLASSICAL, TABLE_CLASSICAL_TEST, TABLE_COMBINED, TABLE_TIMES] {
        store.put_table(table, Vec::new()).await?;
    }
    println!("Initialized board at {:?}", config.root_dir);
    Ok(())
}

async fn cmd_fetch(
    config: &BoardConfig,
    store: Arc<dyn SubmissionStore>,
    repeat: bool,
    delay: Option<u64>,
) -> Result<()> {
    let fetcher = Fetcher::new(config.repos_dir(), store);
    loop {
        let report = fetcher.fetch().await.context("fetch failed")?;
        for id in &report.discovered {
            println!("new submission: {id}");
        }
        println!(
            "fetch done: {} new, {} already known",
            report.discovered.len(),
            report.already_known
        );

        if !repeat {
            return Ok(());
        }
        let delay_secs = delay.unwrap_or(config.fetch_delay_secs);
        info!(delay_secs, "sleeping before next fetch");
        tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
    }
}

async fn cmd_batch(
    config: &BoardConfig,
    store: Arc<dyn SubmissionStore>,
    phase: BatchPhase,
    selection: SelectionArgs,
    default_state: SubmissionState,
) -> Result<()> {
    let selector = selector(&selection, default_state)?;
    let orch = orchestrator(config, store);
    let report = orch.run_batch(phase, &selector).await?;

    for id in &report.completed {
        println!("completed: {id}");
    }
    for (id, reason) in &report.failed {
        println!("failed: {id} ({reason})");
    }
    for id in &report.skipped {
        println!("skipped: {id} (moved by a concurrent pass)");
    }
    println!(
        "batch done: {} completed, {} failed, {} skipped",
        report.completed.len(),
        report.failed.len(),
        report.skipped.len()
    );
    Ok(())
}

async fn cmd_leaderboard(
    config: &BoardConfig,
    store: Arc<dyn SubmissionStore>,
    which: WhichLeaderboard,
    test: bool,
    calibrate: bool,
    metric: MetricChoice,
) -> Result<()> {
    let engine = LeaderboardEngine::new(
        store,
        Arc::new(FsPredictionSource::new(config.ground_truth_dir())),
        metric.metric(),
        config.combiner_rounds,
    );
    let written = engine
        .run(&LeaderboardOptions {
            kind: which.into(),
            test,
            calibrate,
        })
        .await
        .context("leaderboard recomputation failed; previous tables left intact")?;
    println!("replaced tables: {}", written.join(", "));
    Ok(())
}

async fn cmd_change_state(
    config: &BoardConfig,
    store: Arc<dyn SubmissionStore>,
    from: SubmissionState,
    to: SubmissionState,
) -> Result<()> {
    let orch = orchestrator(config, store);
    let moved = orch.change_state(from, to).await?;
    println!("moved {moved} submissions from {from} to {to}");
    Ok(())
}

async fn cmd_set_state(
    config: &BoardConfig,
    store: Arc<dyn SubmissionStore>,
    team: &str,
    tag: &str,
    state: SubmissionState,
) -> Result<()> {
    let orch = orchestrator(config, store);
    let id = orch.set_state(team, tag, state).await?;
    println!("{id} -> {state}");
    Ok(())
}

async fn cmd_kill(config: &BoardConfig, team: &str, tag: &str, yes: bool) -> Result<()> {
    if !yes && !confirm()? {
        println!("aborted");
        return Ok(());
    }

    let registry = JobRegistry::new(config.jobs_dir());
    let id = SubmissionId::new(team, tag);
    let killed = registry.kill_all(&id).await?;
    if killed == 0 {
        println!("no live jobs for {id}");
    } else {
        println!("killed {killed} jobs for {id}");
    }
    Ok(())
}

fn confirm() -> Result<bool> {
    print!("Sure? (y/n): ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

async fn cmd_print_db(
    store: &dyn SubmissionStore,
    table: Option<String>,
    state: Option<SubmissionState>,
) -> Result<()> {
    match table.as_deref() {
        None | Some("submissions") => {
            let filter = match state {
                Some(state) => SubmissionFilter::by_state(state),
                None => SubmissionFilter::all(),
            };
            let subs = store.get(&filter).await?;
            println!(
                "{:<30} {:<8} {:>6} {:>6} error",
                "submission", "state", "train", "test"
            );
            for sub in subs {
                println!(
                    "{:<30} {:<8} {:>6} {:>6} {}",
                    sub.id.to_string(),
                    sub.state.to_string(),
                    sub.train_scores.len(),
                    sub.test_scores.len(),
                    sub.error.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Some(name @ (TABLE_CLASSICAL | TABLE_CLASSICAL_TEST | TABLE_COMBINED | TABLE_TIMES)) => {
            let rows = store.get_table(name).await?;
            println!("{:<6} {:<30} score", "rank", "submission");
            for row in rows {
                println!("{:<6} {:<30} {:.6}", row.rank, format!("{}/{}", row.team, row.tag), row.score);
            }
            Ok(())
        }
        Some(other) => {
            bail!(
                "unknown table '{other}'; choose one of: submissions, {TABLE_CLASSICAL}, \
                 {TABLE_CLASSICAL_TEST}, {TABLE_COMBINED}, {TABLE_TIMES}"
            );
        }
    }
}
