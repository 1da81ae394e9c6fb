use super::{PhaseRunResult, SchedulerConfig};
use crate::dag::DependencyGraph;
use crate::errors::{SchedulerError, SessionError};
use crate::events::{SessionEvent, SettledAs};
use crate::orchestrator::{SessionOrchestrator, SessionOutcome};
use crate::state::{AgentState, Phase, SessionId, SessionStatus, StateHandle, StatusKind};
use anyhow::anyhow;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Settlement = (SessionId, Result<SessionOutcome, SessionError>);

/// Bookkeeping for one phase run.
struct Progress {
    graph: DependencyGraph,
    /// Phase sessions in declaration order
    order: Vec<SessionId>,
    /// COMPLETED anywhere in the plan
    completed: HashSet<SessionId>,
    /// Failed, errored or skipped; dependents can never start
    dead: HashSet<SessionId>,
    /// Phase sessions finished with for this run
    settled: HashSet<SessionId>,
    in_flight: HashSet<SessionId>,
    first_failure: Option<(SessionId, String)>,
}

impl Progress {
    /// Seed from persisted state. Sessions already terminal or blocked are
    /// settled up front; everything else is a candidate.
    fn new(state: &AgentState, phase: &Phase, graph: DependencyGraph, result: &mut PhaseRunResult) -> Self {
        let mut completed = HashSet::new();
        let mut dead = HashSet::new();
        for session in state.sessions() {
            match session.kind() {
                StatusKind::Completed => {
                    completed.insert(session.id);
                }
                StatusKind::Skipped | StatusKind::Error => {
                    dead.insert(session.id);
                }
                _ => {}
            }
        }

        let mut settled = HashSet::new();
        for session in &phase.sessions {
            match &session.status {
                SessionStatus::Completed { .. } => result.completed.push(session.id),
                SessionStatus::Skipped => result.skipped.push(session.id),
                SessionStatus::Error { reason } => {
                    result.record_failure(session.id, reason, session.retry_count)
                }
                SessionStatus::Blocked { .. } => result.blocked.push(session.id),
                _ => continue,
            }
            settled.insert(session.id);
        }

        Self {
            graph,
            order: phase.session_ids(),
            completed,
            dead,
            settled,
            in_flight: HashSet::new(),
            first_failure: None,
        }
    }

    fn is_done(&self) -> bool {
        self.settled.len() == self.order.len()
    }

    /// Candidates whose dependencies are all COMPLETED, in declaration order.
    fn runnable(&self) -> Vec<SessionId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.settled.contains(id) && !self.in_flight.contains(id))
            .filter(|id| self.graph.dependencies_satisfied(*id, &self.completed))
            .collect()
    }

    fn settle(
        &mut self,
        id: SessionId,
        outcome: Result<SessionOutcome, SessionError>,
        retry_count: u32,
        result: &mut PhaseRunResult,
    ) -> SettledAs {
        self.in_flight.remove(&id);
        self.settled.insert(id);
        match outcome {
            Ok(SessionOutcome::Completed { commit }) => {
                self.completed.insert(id);
                result.completed.push(id);
                SettledAs::Completed { commit }
            }
            Ok(SessionOutcome::Skipped) => {
                self.dead.insert(id);
                result.skipped.push(id);
                SettledAs::Skipped
            }
            Ok(SessionOutcome::Paused { .. }) => {
                result.paused.push(id);
                SettledAs::Paused
            }
            // A blocker raised while the session was queued
            Err(SessionError::NotRunnable {
                status: StatusKind::Blocked,
                ..
            }) => {
                result.blocked.push(id);
                SettledAs::Paused
            }
            Err(e) => {
                let error = e.to_string();
                self.dead.insert(id);
                result.record_failure(id, &error, retry_count);
                if self.first_failure.is_none() {
                    self.first_failure = Some((id, error.clone()));
                }
                SettledAs::Failed { error }
            }
        }
    }

    /// Sort whatever never launched into unreachable (a dependency failed or
    /// was skipped, directly or transitively) and waiting.
    fn classify_unsettled(&self, result: &mut PhaseRunResult) {
        let remaining: Vec<SessionId> = self
            .order
            .iter()
            .copied()
            .filter(|id| !self.settled.contains(id))
            .collect();

        let mut unreachable: HashSet<SessionId> = HashSet::new();
        loop {
            let before = unreachable.len();
            for id in &remaining {
                let poisoned = self.graph.node_by_id(*id).is_some_and(|n| {
                    n.depends_on
                        .iter()
                        .any(|dep| self.dead.contains(dep) || unreachable.contains(dep))
                });
                if poisoned {
                    unreachable.insert(*id);
                }
            }
            if unreachable.len() == before {
                break;
            }
        }

        for id in remaining {
            if unreachable.contains(&id) {
                result.unreachable.push(id);
            } else {
                result.waiting.push(id);
            }
        }
        result.deadlocked = !result.unreachable.is_empty();
    }
}

/// Runs the sessions of a phase under dependency and concurrency constraints.
pub struct PhaseScheduler {
    orchestrator: SessionOrchestrator,
    config: SchedulerConfig,
}

impl PhaseScheduler {
    pub fn new(orchestrator: SessionOrchestrator, config: SchedulerConfig) -> Self {
        Self { orchestrator, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn state(&self) -> &StateHandle {
        self.orchestrator.state()
    }

    /// Build and validate the dependency graph of one phase.
    pub async fn validate_phase(&self, number: u32) -> Result<(), SchedulerError> {
        let snapshot = self.state().snapshot().await;
        let phase = snapshot
            .phase(number)
            .ok_or(SchedulerError::PhaseNotFound(number))?;
        graph_for(&snapshot, phase)?;
        Ok(())
    }

    /// Drive every session of a phase until each has settled or can make no
    /// further progress.
    ///
    /// Sessions completed by an earlier run are reported but not re-run, so
    /// running a phase twice is harmless. A cyclic phase is rejected before
    /// any session starts.
    pub async fn run_phase(&self, number: u32) -> Result<PhaseRunResult, SchedulerError> {
        let timer = Instant::now();
        let snapshot = self.state().snapshot().await;
        let phase = snapshot
            .phase(number)
            .ok_or(SchedulerError::PhaseNotFound(number))?;
        let graph = graph_for(&snapshot, phase)?;

        let mut result = PhaseRunResult::new(number, phase.sessions.len());
        let mut progress = Progress::new(&snapshot, phase, graph, &mut result);
        info!(
            phase = number,
            name = %phase.name,
            sessions = phase.sessions.len(),
            max_concurrent = self.config.concurrency(),
            "Running phase"
        );
        self.orchestrator
            .events()
            .emit(SessionEvent::PhaseStarted {
                phase: number,
                name: phase.name.clone(),
                sessions: phase.sessions.len(),
            })
            .await;

        if self.config.sequential {
            self.run_sequential(&mut progress, &mut result).await;
        } else {
            self.run_concurrent(&mut progress, &mut result).await;
        }

        progress.classify_unsettled(&mut result);
        result.duration = timer.elapsed();
        result.normalize();
        self.mark_phase_finished(number).await?;

        if result.deadlocked {
            warn!(
                phase = number,
                unreachable = ?result.unreachable,
                "Sessions can never start: a dependency failed or was skipped"
            );
        }
        info!(
            phase = number,
            completed = result.completed.len(),
            failed = result.failed.len(),
            paused = result.paused.len(),
            waiting = result.waiting.len(),
            "Phase run finished"
        );
        self.orchestrator
            .events()
            .emit(SessionEvent::PhaseFinished {
                phase: number,
                completed: result.completed.len(),
                failed: result.failed.len(),
                deadlocked: result.deadlocked,
            })
            .await;

        if self.config.stop_on_error
            && let Some((session, error)) = progress.first_failure.take()
        {
            return Err(SchedulerError::StoppedOnError {
                session,
                error,
                partial: Box::new(result),
            });
        }
        Ok(result)
    }

    /// Run phases in order, stopping after the first one left incomplete.
    pub async fn run_all(&self) -> Result<Vec<PhaseRunResult>, SchedulerError> {
        let numbers: Vec<u32> = self
            .state()
            .read(|state| state.phases.iter().map(|p| p.number).collect())
            .await;

        let mut results = Vec::new();
        for number in numbers {
            let result = self.run_phase(number).await?;
            let complete = result.is_complete();
            results.push(result);
            if !complete {
                info!(phase = number, "Phase incomplete, not starting later phases");
                break;
            }
        }
        Ok(results)
    }

    async fn run_sequential(&self, progress: &mut Progress, result: &mut PhaseRunResult) {
        loop {
            if progress.first_failure.is_some() && self.config.stop_on_error {
                break;
            }
            let Some(id) = progress.runnable().first().copied() else {
                break;
            };
            progress.in_flight.insert(id);
            let outcome = self.orchestrator.drive(id).await;
            self.settle(progress, result, id, outcome).await;
        }
    }

    async fn run_concurrent(&self, progress: &mut Progress, result: &mut PhaseRunResult) {
        let (result_tx, mut result_rx) = mpsc::channel::<Settlement>(progress.order.len().max(1));
        let mut active_tasks: HashMap<SessionId, JoinHandle<()>> = HashMap::new();
        let limit = self.config.concurrency();

        while !progress.is_done() {
            let stopping = progress.first_failure.is_some() && self.config.stop_on_error;
            if !stopping {
                let capacity = limit.saturating_sub(active_tasks.len());
                for id in progress.runnable().into_iter().take(capacity) {
                    debug!(session = id, "Launching session");
                    progress.in_flight.insert(id);
                    active_tasks.insert(id, self.spawn_session(id, result_tx.clone()));
                }
            }

            if active_tasks.is_empty() {
                break;
            }

            // Nothing else can become runnable until something settles.
            let Some((id, outcome)) = result_rx.recv().await else {
                break;
            };
            if let Some(handle) = active_tasks.remove(&id) {
                let _ = handle.await;
            }
            self.settle(progress, result, id, outcome).await;
        }
    }

    fn spawn_session(&self, id: SessionId, result_tx: mpsc::Sender<Settlement>) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let outcome = match tokio::spawn(async move { orchestrator.drive(id).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(SessionError::Store(anyhow!("session task aborted: {}", e))),
            };
            let _ = result_tx.send((id, outcome)).await;
        })
    }

    async fn settle(
        &self,
        progress: &mut Progress,
        result: &mut PhaseRunResult,
        id: SessionId,
        outcome: Result<SessionOutcome, SessionError>,
    ) {
        let retry_count = self
            .state()
            .read(|state| state.session(id).map_or(0, |s| s.retry_count))
            .await;
        let settled = progress.settle(id, outcome, retry_count, result);
        match &settled {
            SettledAs::Failed { error } => warn!(session = id, %error, "Session failed"),
            other => info!(session = id, outcome = ?other, "Session settled"),
        }
        self.orchestrator
            .events()
            .emit(SessionEvent::SessionSettled {
                session: id,
                outcome: settled,
            })
            .await;
    }

    async fn mark_phase_finished(&self, number: u32) -> Result<(), SchedulerError> {
        let now = Utc::now();
        self.state()
            .update(|state| {
                if let Some(phase) = state.phase_mut(number)
                    && phase.is_complete()
                    && phase.completed_at.is_none()
                {
                    phase.completed_at = Some(now);
                }
                Ok::<_, anyhow::Error>(())
            })
            .await?;
        Ok(())
    }
}

fn graph_for(state: &AgentState, phase: &Phase) -> Result<DependencyGraph, SchedulerError> {
    let graph = DependencyGraph::for_phase(phase, state.sessions().map(|s| s.id))?;
    graph.validate()?;
    Ok(graph)
}
