//! Integration tests for batch orchestration with the memory store and
//! real shell jobs in a tempdir.

use std::path::Path;
use std::sync::Arc;

use modelboard_core::{
    BatchPhase, BoardConfig, BoardError, JobRegistry, JobRunner, LeaderboardEngine,
    LeaderboardKind, LeaderboardOptions, Orchestrator, Selector,
};
use modelboard_core::leaderboard::{Accuracy, MemoryPredictionSource};
use modelboard_state::{
    MemorySubmissionStore, Submission, SubmissionFilter, SubmissionId, SubmissionState,
    SubmissionStore, TABLE_CLASSICAL, TABLE_TIMES,
};

/// Command template whose jobs write a fixed score artifact and exit 0.
fn scoring_command(value: f64) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(r#"mkdir -p {{dir}}/scores && echo '{{"value": {value}}}' > {{dir}}/scores/{{phase}}_{{fold}}.json"#),
    ]
}

fn failing_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo training exploded >&2; exit 1".to_string(),
    ]
}

fn config(root: &Path, train: Vec<String>, test: Vec<String>) -> BoardConfig {
    BoardConfig {
        root_dir: root.to_path_buf(),
        folds: 2,
        train_command: train,
        test_command: test,
        ..BoardConfig::rooted(root)
    }
}

async fn seed(store: &Arc<MemorySubmissionStore>, root: &Path, team: &str, tag: &str) -> SubmissionId {
    let dir = root.join(team).join(tag);
    std::fs::create_dir_all(&dir).unwrap();
    let id = SubmissionId::new(team, tag);
    store
        .insert(Submission::discovered(id.clone(), dir))
        .await
        .unwrap();
    id
}

fn orchestrator(store: Arc<MemorySubmissionStore>, config: BoardConfig) -> Orchestrator {
    let runner = JobRunner::new(JobRegistry::new(config.jobs_dir()));
    Orchestrator::new(store, runner, config)
}

#[tokio::test]
async fn train_batch_moves_new_to_trained_with_scores() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    let id = seed(&store, dir.path(), "teamA", "model1").await;

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), scoring_command(0.81), scoring_command(0.78)),
    );

    let report = orch
        .run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New))
        .await
        .unwrap();
    assert_eq!(report.completed, vec![id.clone()]);
    assert!(report.failed.is_empty());

    let sub = store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(sub.state, SubmissionState::Trained);
    assert_eq!(sub.train_scores.len(), 2);
    assert!(sub.trained_at.is_some());
    assert!(sub.test_scores.is_empty());
}

#[tokio::test]
async fn train_test_reaches_tested_with_both_score_sets() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    let id = seed(&store, dir.path(), "teamA", "model1").await;

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), scoring_command(0.81), scoring_command(0.78)),
    );

    let report = orch
        .run_batch(
            BatchPhase::TrainThenTest,
            &Selector::ByState(SubmissionState::New),
        )
        .await
        .unwrap();
    assert_eq!(report.completed, vec![id.clone()]);

    let sub = store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(sub.state, SubmissionState::Tested);
    assert_eq!(sub.train_scores.len(), 2);
    assert_eq!(sub.test_scores.len(), 2);
    assert!(sub.trained_at.is_some() && sub.tested_at.is_some());
}

#[tokio::test]
async fn failing_job_moves_submission_to_error_and_spares_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());

    let good = seed(&store, dir.path(), "teamA", "works").await;
    let bad = seed(&store, dir.path(), "teamB", "breaks").await;

    // The command fails only inside teamB's submission directory.
    let train = vec![
        "sh".to_string(),
        "-c".to_string(),
        r#"case {dir} in *breaks*) echo no >&2; exit 1;; esac; mkdir -p {dir}/scores && echo '{"value": 0.7}' > {dir}/scores/{phase}_{fold}.json"#.to_string(),
    ];

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), train, scoring_command(0.5)),
    );
    let report = orch
        .run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New))
        .await
        .unwrap();

    assert_eq!(report.completed, vec![good.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, bad);

    let good_sub = store.get_by_id(&good).await.unwrap().unwrap();
    assert_eq!(good_sub.state, SubmissionState::Trained);

    let bad_sub = store.get_by_id(&bad).await.unwrap().unwrap();
    assert_eq!(bad_sub.state, SubmissionState::Error);
    let detail = bad_sub.error.unwrap();
    assert!(detail.contains("exited 1"), "{detail}");
}

#[tokio::test]
async fn signal_killed_job_moves_submission_to_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    let live = seed(&store, dir.path(), "teamA", "stays").await;
    let dead = seed(&store, dir.path(), "teamB", "dies").await;

    // teamB's fold jobs die by signal, as under operator cancellation.
    let train = vec![
        "sh".to_string(),
        "-c".to_string(),
        r#"case {dir} in *dies*) kill -TERM $$;; esac; mkdir -p {dir}/scores && echo '{"value": 0.7}' > {dir}/scores/{phase}_{fold}.json"#.to_string(),
    ];

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), train, scoring_command(0.5)),
    );
    let report = orch
        .run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New))
        .await
        .unwrap();

    assert_eq!(report.completed, vec![live.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, dead);

    let dead_sub = store.get_by_id(&dead).await.unwrap().unwrap();
    assert_eq!(dead_sub.state, SubmissionState::Error);
    let detail = dead_sub.error.unwrap();
    assert!(detail.contains("killed"), "{detail}");

    let live_sub = store.get_by_id(&live).await.unwrap().unwrap();
    assert_eq!(live_sub.state, SubmissionState::Trained);
}

#[tokio::test]
async fn registry_failure_errors_one_submission_not_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    let good = seed(&store, dir.path(), "teamA", "m1").await;
    let blocked = seed(&store, dir.path(), "teamB", "m1").await;

    let cfg = config(dir.path(), scoring_command(0.6), scoring_command(0.6));
    // A plain file where teamB's handle directory belongs makes every
    // job registration for that team fail.
    std::fs::create_dir_all(cfg.jobs_dir()).unwrap();
    std::fs::write(cfg.jobs_dir().join("teamB"), "").unwrap();

    let orch = orchestrator(Arc::clone(&store), cfg);
    let report = orch
        .run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New))
        .await
        .unwrap();

    assert_eq!(report.completed, vec![good.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, blocked);

    let good_sub = store.get_by_id(&good).await.unwrap().unwrap();
    assert_eq!(good_sub.state, SubmissionState::Trained);
    let blocked_sub = store.get_by_id(&blocked).await.unwrap().unwrap();
    assert_eq!(blocked_sub.state, SubmissionState::Error);
    assert!(blocked_sub.error.is_some());
}

#[tokio::test]
async fn tag_selector_matches_ignore_state_and_errors_when_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    let id = seed(&store, dir.path(), "teamA", "forest").await;

    // Move it out of `new`; the tag selector must still pick it up.
    store
        .apply(
            std::slice::from_ref(&id),
            &modelboard_state::SubmissionMutation::state(SubmissionState::Trained),
        )
        .await
        .unwrap();

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), scoring_command(0.9), scoring_command(0.8)),
    );

    let report = orch
        .run_batch(BatchPhase::Train, &Selector::ByTagAll("for".to_string()))
        .await
        .unwrap();
    assert_eq!(report.completed, vec![id]);

    // Empty tag filter is an explicit error and mutates nothing.
    let err = orch
        .run_batch(BatchPhase::Train, &Selector::ByTagAll("nope".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::NoModelFound { .. }));
    assert!(err.to_string().contains("no model found"));
}

#[tokio::test]
async fn concurrent_batches_commit_each_transition_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    for i in 0..4 {
        seed(&store, dir.path(), "team", &format!("m{i}")).await;
    }

    let cfg = config(dir.path(), scoring_command(0.6), scoring_command(0.6));
    let orch_a = Arc::new(orchestrator(Arc::clone(&store), cfg.clone()));
    let orch_b = Arc::new(orchestrator(Arc::clone(&store), cfg));

    let (ra, rb) = tokio::join!(
        orch_a.run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New)),
        orch_b.run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New)),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    let trained = store
        .get(&SubmissionFilter::by_state(SubmissionState::Trained))
        .await
        .unwrap();
    assert_eq!(trained.len(), 4);
    let total_committed = ra.completed.len() + rb.completed.len();
    assert_eq!(total_committed, 4, "no transition committed twice");
}

#[tokio::test]
async fn set_state_reports_ambiguous_and_missing_selections() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    seed(&store, dir.path(), "teamA", "forest-1").await;
    seed(&store, dir.path(), "teamA", "forest-2").await;

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), scoring_command(0.5), scoring_command(0.5)),
    );

    let err = orch
        .set_state("teamA", "forest", SubmissionState::New)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::AmbiguousSelection { matches: 2 }));
    assert!(err.to_string().contains("ambiguous selection"));

    let err = orch
        .set_state("teamA", "missing", SubmissionState::New)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::NoModelFound { .. }));

    // Nothing was mutated by either failure.
    let subs = store.get(&SubmissionFilter::all()).await.unwrap();
    assert!(subs.iter().all(|s| s.state == SubmissionState::New));

    // An unambiguous match mutates exactly one.
    let id = orch
        .set_state("teamA", "forest-2", SubmissionState::Error)
        .await
        .unwrap();
    assert_eq!(id, SubmissionId::new("teamA", "forest-2"));
}

#[tokio::test]
async fn change_state_moves_all_matching() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySubmissionStore::new());
    seed(&store, dir.path(), "teamA", "m1").await;
    seed(&store, dir.path(), "teamB", "m2").await;

    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), scoring_command(0.5), scoring_command(0.5)),
    );
    let moved = orch
        .change_state(SubmissionState::New, SubmissionState::Error)
        .await
        .unwrap();
    assert_eq!(moved, 2);

    let errored = store
        .get(&SubmissionFilter::by_state(SubmissionState::Error))
        .await
        .unwrap();
    assert_eq!(errored.len(), 2);
}

#[tokio::test]
async fn leaderboard_run_is_idempotent_and_excludes_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<MemorySubmissionStore> = Arc::new(MemorySubmissionStore::new());
    let a = seed(&store, dir.path(), "teamA", "model1").await;
    let b = seed(&store, dir.path(), "teamB", "model2").await;
    let _c = seed(&store, dir.path(), "teamC", "broken").await;

    // Train teamA and teamB with distinct scores; leave teamC errored.
    let train = vec![
        "sh".to_string(),
        "-c".to_string(),
        r#"mkdir -p {dir}/scores; case {dir} in *teamA*) v=0.81;; *) v=0.76;; esac; echo "{\"value\": $v}" > {dir}/scores/{phase}_{fold}.json"#.to_string(),
    ];
    let orch = orchestrator(
        Arc::clone(&store),
        config(dir.path(), train, scoring_command(0.7)),
    );
    orch.run_batch(BatchPhase::Train, &Selector::ByState(SubmissionState::New))
        .await
        .unwrap();
    orch.set_state("teamC", "broken", SubmissionState::Error)
        .await
        .unwrap();

    let store_dyn: Arc<dyn SubmissionStore> = Arc::clone(&store) as Arc<dyn SubmissionStore>;
    let engine = LeaderboardEngine::new(
        store_dyn,
        Arc::new(MemoryPredictionSource::new()),
        Arc::new(Accuracy),
        10,
    );
    let options = LeaderboardOptions {
        kind: LeaderboardKind::All,
        test: false,
        calibrate: false,
    };
    engine.run(&options).await.unwrap();

    let rows = store.get_table(TABLE_CLASSICAL).await.unwrap();
    assert_eq!(rows.len(), 2, "errored submission excluded");
    assert_eq!(rows[0].team, a.team);
    assert!((rows[0].score - 0.81).abs() < 1e-9);
    assert_eq!(rows[1].team, b.team);
    assert!((rows[1].score - 0.76).abs() < 1e-9);

    let times = store.get_table(TABLE_TIMES).await.unwrap();
    assert_eq!(times.len(), 2);

    // Re-running from an unchanged snapshot yields identical tables.
    engine.run(&options).await.unwrap();
    let rows_again = store.get_table(TABLE_CLASSICAL).await.unwrap();
    assert_eq!(rows, rows_again);
}
