//! End-to-end scheduling through the public library API, with an in-process
//! executor standing in for real tooling.

use anyhow::{Result, bail};
use async_trait::async_trait;
use cadence::checkpoint::{CheckpointAction, CheckpointType};
use cadence::errors::{GraphError, SchedulerError};
use cadence::executor::{ExecutionContext, ExecutorRegistry, SessionExecutor, Stage, StageReport};
use cadence::gates::{AutoApprove, DecisionSource, QueuedDecisions};
use cadence::orchestrator::{OrchestratorConfig, SessionOrchestrator};
use cadence::scheduler::{PhaseScheduler, SchedulerConfig};
use cadence::state::{
    AgentState, Domain, Phase, Session, SessionId, SessionStatus, StateHandle, StateStore,
    StatusKind,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Records every stage it runs and how many sessions were in flight at once.
#[derive(Default)]
struct RecordingExecutor {
    active: AtomicUsize,
    max_active: AtomicUsize,
    log: Mutex<Vec<(SessionId, Stage, u32)>>,
    fail_red: HashSet<SessionId>,
    coverage: Option<f64>,
}

impl RecordingExecutor {
    fn failing(ids: impl IntoIterator<Item = SessionId>) -> Self {
        Self {
            fail_red: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    fn with_coverage(coverage: f64) -> Self {
        Self {
            coverage: Some(coverage),
            ..Default::default()
        }
    }

    fn log(&self) -> Vec<(SessionId, Stage, u32)> {
        self.log.lock().unwrap().clone()
    }

    fn position(&self, session: SessionId, stage: Stage) -> usize {
        self.log()
            .iter()
            .position(|(id, s, _)| *id == session && *s == stage)
            .unwrap_or_else(|| panic!("#{} never ran {}", session, stage))
    }

    async fn work(&self, ctx: &ExecutionContext, stage: Stage) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log
            .lock()
            .unwrap()
            .push((ctx.session.id, stage, ctx.attempt));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionExecutor for RecordingExecutor {
    async fn execute_red_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.work(ctx, Stage::Red).await;
        if self.fail_red.contains(&ctx.session.id) {
            bail!("test harness crashed");
        }
        Ok(StageReport {
            tests_written: 4,
            tests_failing: 4,
            ..Default::default()
        })
    }

    async fn execute_green_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.work(ctx, Stage::Green).await;
        Ok(StageReport {
            tests_passing: 4,
            coverage: Some(self.coverage.unwrap_or(91.0)),
            ..Default::default()
        })
    }

    async fn execute_refactor_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.work(ctx, Stage::Refactor).await;
        Ok(StageReport {
            tests_passing: 4,
            coverage: Some(self.coverage.unwrap_or(93.0)),
            ..Default::default()
        })
    }

    async fn create_commit(&self, ctx: &ExecutionContext) -> Result<String> {
        self.work(ctx, Stage::Commit).await;
        Ok(format!("c{}", ctx.session.id))
    }
}

fn storefront() -> AgentState {
    AgentState::new(
        "storefront",
        vec![Phase::new(
            1,
            "Checkout",
            vec![
                Session::new(1, "Orders table", Domain::Backend).with_estimate(30),
                Session::new(2, "Cart widget", Domain::Frontend).with_estimate(20),
                Session::new(3, "Checkout flow", Domain::Backend)
                    .with_dependencies([1, 2])
                    .with_estimate(45),
            ],
        )],
    )
}

struct Harness {
    _dir: TempDir,
    store_dir: std::path::PathBuf,
    executor: Arc<RecordingExecutor>,
    scheduler: PhaseScheduler,
}

impl Harness {
    fn new(
        state: AgentState,
        executor: RecordingExecutor,
        decisions: Arc<dyn DecisionSource>,
        max_retries: u32,
        config: SchedulerConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("state");
        let executor = Arc::new(executor);
        let orchestrator = SessionOrchestrator::new(
            StateHandle::new(state, StateStore::new(&store_dir)),
            ExecutorRegistry::uniform(executor.clone()),
            decisions,
            OrchestratorConfig {
                max_retries,
                ..Default::default()
            },
        );
        Self {
            _dir: dir,
            store_dir,
            executor,
            scheduler: PhaseScheduler::new(orchestrator, config),
        }
    }

    fn auto(state: AgentState, executor: RecordingExecutor) -> Self {
        Self::new(state, executor, Arc::new(AutoApprove), 3, SchedulerConfig::default())
    }

    async fn state(&self) -> AgentState {
        StateStore::new(&self.store_dir)
            .load("storefront")
            .unwrap()
            .expect("state persisted")
    }
}

#[tokio::test]
async fn independent_sessions_overlap_and_dependents_wait() {
    let harness = Harness::auto(storefront(), RecordingExecutor::default());

    let result = harness.scheduler.run_phase(1).await.unwrap();

    assert!(result.success());
    assert!(result.is_complete());
    assert_eq!(result.completed, vec![1, 2, 3]);
    assert_eq!(harness.executor.max_active.load(Ordering::SeqCst), 2);

    let red_3 = harness.executor.position(3, Stage::Red);
    assert!(harness.executor.position(1, Stage::Commit) < red_3);
    assert!(harness.executor.position(2, Stage::Commit) < red_3);
}

#[tokio::test]
async fn cyclic_phase_is_rejected_before_anything_runs() {
    let state = AgentState::new(
        "storefront",
        vec![Phase::new(
            1,
            "Loop",
            vec![
                Session::new(1, "A", Domain::Backend).with_dependencies([2]),
                Session::new(2, "B", Domain::Backend).with_dependencies([3]),
                Session::new(3, "C", Domain::Backend).with_dependencies([1]),
            ],
        )],
    );
    let harness = Harness::auto(state, RecordingExecutor::default());

    let err = harness.scheduler.run_phase(1).await.unwrap_err();
    match err {
        SchedulerError::Graph(GraphError::CycleDetected { cycles }) => {
            assert_eq!(cycles.len(), 1);
            let members: HashSet<SessionId> = cycles[0].iter().copied().collect();
            assert_eq!(members, HashSet::from([1, 2, 3]));
        }
        other => panic!("Expected a cycle error, got {other:?}"),
    }
    assert!(harness.executor.log().is_empty());
}

#[tokio::test]
async fn a_failed_session_does_not_stop_independent_work() {
    let harness = Harness::new(
        storefront(),
        RecordingExecutor::failing([1]),
        Arc::new(AutoApprove),
        0,
        SchedulerConfig::default(),
    );

    let result = harness.scheduler.run_phase(1).await.unwrap();

    assert!(!result.success());
    assert_eq!(result.completed, vec![2]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].session, 1);
    assert_eq!(result.unreachable, vec![3]);
    assert!(result.deadlocked);

    let state = harness.state().await;
    assert_eq!(state.session(1).unwrap().kind(), StatusKind::Error);
    assert_eq!(state.session(3).unwrap().kind(), StatusKind::NotStarted);
}

#[tokio::test]
async fn retry_at_after_red_reruns_the_stage() {
    let decisions = Arc::new(QueuedDecisions::new());
    decisions
        .push(1, [CheckpointAction::Proceed, CheckpointAction::Retry])
        .await;
    let harness = Harness::new(
        storefront(),
        RecordingExecutor::default(),
        decisions.clone(),
        3,
        SchedulerConfig::default().with_sequential(true),
    );

    let result = harness.scheduler.run_phase(1).await.unwrap();
    assert!(result.success());

    let reds: Vec<u32> = harness
        .executor
        .log()
        .iter()
        .filter(|(id, stage, _)| *id == 1 && *stage == Stage::Red)
        .map(|(_, _, attempt)| *attempt)
        .collect();
    assert_eq!(reds, vec![1, 2]);

    let after_red = decisions
        .seen()
        .await
        .into_iter()
        .filter(|(id, kind)| *id == 1 && *kind == CheckpointType::AfterRed)
        .count();
    assert_eq!(after_red, 2);
}

#[tokio::test]
async fn rerunning_a_finished_phase_does_no_work() {
    let harness = Harness::auto(storefront(), RecordingExecutor::default());
    harness.scheduler.run_phase(1).await.unwrap();
    let runs = harness.executor.log().len();

    let again = harness.scheduler.run_phase(1).await.unwrap();

    assert!(again.is_complete());
    assert_eq!(again.completed, vec![1, 2, 3]);
    assert_eq!(harness.executor.log().len(), runs);
}

#[tokio::test]
async fn low_coverage_is_refused_and_the_refactor_gate_returns() {
    let state = AgentState::new(
        "storefront",
        vec![Phase::new(
            1,
            "Checkout",
            vec![Session::new(1, "Orders table", Domain::Backend)],
        )],
    );
    let harness = Harness::auto(state, RecordingExecutor::with_coverage(55.0));

    let result = harness.scheduler.run_phase(1).await.unwrap();

    assert!(result.completed.is_empty());
    assert!(result.failed[0].error.contains("coverage"));

    let state = harness.state().await;
    let session = state.session(1).unwrap();
    assert_eq!(session.retry_count, 1);
    match &session.status {
        SessionStatus::AwaitingApproval { checkpoint } => {
            assert_eq!(checkpoint.kind, CheckpointType::AfterRefactor);
            assert!(checkpoint.decision.is_none());
        }
        other => panic!("Expected the refactor gate, got {other:?}"),
    }
}

#[tokio::test]
async fn persisted_state_matches_the_run() {
    let harness = Harness::auto(storefront(), RecordingExecutor::default());
    harness.scheduler.run_phase(1).await.unwrap();

    let state = harness.state().await;
    assert_eq!(state.progress(), (3, 3));
    assert_eq!(state.session(3).unwrap().commit(), Some("c3"));
    assert!(state.phase(1).unwrap().completed_at.is_some());
    assert!(state.link_violations().is_empty());
    assert!(state.session(1).unwrap().blocks.contains(&3));
    assert!(state.session(2).unwrap().blocks.contains(&3));
}

#[tokio::test]
async fn stop_on_error_returns_the_partial_result() {
    let harness = Harness::new(
        storefront(),
        RecordingExecutor::failing([1]),
        Arc::new(AutoApprove),
        0,
        SchedulerConfig::default()
            .with_sequential(true)
            .with_stop_on_error(true),
    );

    match harness.scheduler.run_phase(1).await {
        Err(SchedulerError::StoppedOnError {
            session, partial, ..
        }) => {
            assert_eq!(session, 1);
            assert_eq!(partial.failed.len(), 1);
            assert!(!partial.completed.contains(&3));
        }
        other => panic!("Expected StoppedOnError, got {other:?}"),
    }
}
