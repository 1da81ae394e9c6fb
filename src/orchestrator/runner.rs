use super::{OrchestratorConfig, SessionOutcome};
use crate::checkpoint::{
    Checkpoint, CheckpointAction, CheckpointType, activate_checkpoint, apply_transition,
    handle_checkpoint_response,
};
use crate::errors::SessionError;
use crate::events::{EventSink, SessionEvent};
use crate::executor::{ExecutionContext, ExecutorRegistry, SessionExecutor, Stage, run_stage};
use crate::gates::DecisionSource;
use crate::state::{Cursor, SessionId, SessionStatus, StateHandle, StatusKind, TddPhase};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Next thing to do for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Gate(CheckpointType),
    Decide(CheckpointType, CheckpointAction),
    Run(TddPhase),
    Commit,
}

/// Drives one session at a time through RED → GREEN → REFACTOR → COMMIT.
#[derive(Clone)]
pub struct SessionOrchestrator {
    state: StateHandle,
    executors: ExecutorRegistry,
    decisions: Arc<dyn DecisionSource>,
    config: OrchestratorConfig,
    events: EventSink,
}

impl SessionOrchestrator {
    pub fn new(
        state: StateHandle,
        executors: ExecutorRegistry,
        decisions: Arc<dyn DecisionSource>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            executors,
            decisions,
            config,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Drive a session until it completes, is skipped, or pauses at a checkpoint.
    ///
    /// Resumes from the persisted status, so calling this again after a pause
    /// or a failure picks up where the session stopped. Dependency
    /// satisfaction is checked atomically with the transition into
    /// IN_PROGRESS.
    pub async fn drive(&self, id: SessionId) -> Result<SessionOutcome, SessionError> {
        let session = self.state.session(id).await?;
        match &session.status {
            SessionStatus::Completed { commit, .. } => {
                return Ok(SessionOutcome::Completed {
                    commit: commit.clone(),
                });
            }
            SessionStatus::Skipped => return Ok(SessionOutcome::Skipped),
            SessionStatus::Blocked { .. } | SessionStatus::Error { .. } => {
                return Err(SessionError::NotRunnable {
                    session: id,
                    status: session.kind(),
                });
            }
            _ => {}
        }
        let executor = self
            .executors
            .resolve(session.domain)
            .ok_or(SessionError::NoExecutor {
                session: id,
                domain: session.domain,
            })?;

        let now = Utc::now();
        let (mut step, phase) = self
            .state
            .update(|state| {
                let pending = state.pending_dependencies(id)?;
                if !pending.is_empty() {
                    return Err(SessionError::DependencyNotSatisfied {
                        session: id,
                        pending,
                    });
                }
                let phase = state.phase_of(id).map_or(0, |p| p.number);
                state.current = Some(Cursor {
                    phase,
                    session: Some(id),
                });
                if let Some(p) = state.phase_mut(phase)
                    && p.started_at.is_none()
                {
                    p.started_at = Some(now);
                }

                let session = state.session_mut(id).ok_or(SessionError::NotFound(id))?;
                let step = match &session.status {
                    SessionStatus::NotStarted => {
                        session.start(now);
                        Step::Gate(CheckpointType::BeforeStart)
                    }
                    SessionStatus::InProgress => Step::Gate(CheckpointType::BeforeStart),
                    SessionStatus::RedPhase => Step::Run(TddPhase::Red),
                    SessionStatus::GreenPhase => Step::Run(TddPhase::Green),
                    SessionStatus::RefactorPhase => Step::Run(TddPhase::Refactor),
                    SessionStatus::AwaitingApproval { checkpoint } => match checkpoint.decision {
                        Some(action) => Step::Decide(checkpoint.kind, action),
                        None => Step::Gate(checkpoint.kind),
                    },
                    other => {
                        return Err(SessionError::NotRunnable {
                            session: id,
                            status: other.kind(),
                        });
                    }
                };
                Ok((step, phase))
            })
            .await?;

        info!(session = id, phase, ?step, "Driving session");
        self.events
            .emit(SessionEvent::SessionStarted {
                phase,
                session: id,
                title: session.title.clone(),
            })
            .await;

        let mut attempt = 1;
        loop {
            step = match step {
                Step::Gate(kind) => {
                    let checkpoint = self
                        .state
                        .update_session(id, |s| {
                            let checkpoint = Checkpoint::new(kind, s);
                            activate_checkpoint(s, &checkpoint);
                            Ok(checkpoint)
                        })
                        .await?;
                    info!(session = id, checkpoint = %kind, "Checkpoint reached");
                    self.events
                        .emit(SessionEvent::CheckpointReached {
                            session: id,
                            checkpoint: kind,
                        })
                        .await;
                    let action = self.decisions.decide(&checkpoint).await?;
                    Step::Decide(kind, action)
                }
                Step::Decide(kind, action) => {
                    let transition = handle_checkpoint_response(kind, action);
                    debug!(session = id, checkpoint = %kind, %action, status = %transition.status, "Applying decision");
                    self.state
                        .update_session(id, |s| {
                            apply_transition(s, kind, transition);
                            Ok(())
                        })
                        .await?;

                    if action == CheckpointAction::Retry {
                        attempt += 1;
                    } else {
                        attempt = 1;
                    }
                    match transition.status {
                        StatusKind::Skipped => {
                            info!(session = id, checkpoint = %kind, "Session skipped");
                            return Ok(SessionOutcome::Skipped);
                        }
                        StatusKind::AwaitingApproval => {
                            info!(session = id, checkpoint = %kind, %action, "Session paused");
                            return Ok(SessionOutcome::Paused { checkpoint: kind });
                        }
                        StatusKind::Completed => Step::Commit,
                        StatusKind::InProgress => Step::Gate(CheckpointType::BeforeStart),
                        StatusKind::RedPhase | StatusKind::GreenPhase | StatusKind::RefactorPhase => {
                            match transition.tdd_phase {
                                Some(phase) => Step::Run(phase),
                                None => Step::Gate(kind),
                            }
                        }
                        other => {
                            return Err(SessionError::NotRunnable {
                                session: id,
                                status: other,
                            });
                        }
                    }
                }
                Step::Run(phase) => {
                    let ctx = self.context(id, attempt).await?;
                    let report = match run_stage(executor.as_ref(), phase, &ctx).await {
                        Ok(report) => report,
                        Err(e) => return Err(self.fail(id, Stage::from(phase), e).await),
                    };

                    let max_retries = self.config.max_retries;
                    let metrics = self
                        .state
                        .update_session(id, |s| {
                            s.enter_phase(phase);
                            report.apply_to(phase, &mut s.metrics);
                            s.record_files(&report.files);
                            for recovered in &report.recovered_errors {
                                s.record_error(Stage::from(phase).as_str(), recovered, true, max_retries, Utc::now());
                            }
                            Ok(s.metrics.clone())
                        })
                        .await?;
                    info!(
                        session = id,
                        stage = %phase,
                        tests_written = metrics.tests_written,
                        tests_passing = metrics.tests_passing,
                        "Stage finished"
                    );
                    self.events
                        .emit(SessionEvent::StageFinished {
                            session: id,
                            stage: Stage::from(phase),
                            tests_written: metrics.tests_written,
                            tests_passing: metrics.tests_passing,
                            coverage: metrics.coverage,
                        })
                        .await;
                    Step::Gate(CheckpointType::after(phase))
                }
                Step::Commit => {
                    let ctx = self.context(id, attempt).await?;
                    let commit = match executor.create_commit(&ctx).await {
                        Ok(commit) => commit,
                        Err(e) => return Err(self.fail(id, Stage::Commit, e).await),
                    };
                    return self.finish(id, &commit).await;
                }
            };
        }
    }

    /// Validated completion, then the advisory SESSION_COMPLETE checkpoint.
    async fn finish(&self, id: SessionId, commit: &str) -> Result<SessionOutcome, SessionError> {
        let thresholds = self.config.coverage;
        let completed = self
            .state
            .update_session(id, |s| {
                s.complete(commit, &thresholds, Utc::now())
                    .map_err(|failure| SessionError::Validation {
                        session: id,
                        failure,
                    })?;
                Ok(s.clone())
            })
            .await;

        let session = match completed {
            Ok(session) => session,
            Err(SessionError::Validation { session, failure }) => {
                warn!(session = id, %failure, "Completion refused");
                // Put the refactor gate back in front of the operator.
                let max_retries = self.config.max_retries;
                let message = failure.to_string();
                self.state
                    .update_session(id, |s| {
                        if let SessionStatus::AwaitingApproval { checkpoint } = &mut s.status {
                            checkpoint.decision = None;
                        }
                        s.record_error(Stage::Commit.as_str(), &message, false, max_retries, Utc::now());
                        Ok(())
                    })
                    .await?;
                return Err(SessionError::Validation { session, failure });
            }
            Err(other) => return Err(other),
        };

        info!(session = id, commit, "Session completed");
        let checkpoint = Checkpoint::session_complete(&session);
        self.events
            .emit(SessionEvent::CheckpointReached {
                session: id,
                checkpoint: CheckpointType::SessionComplete,
            })
            .await;
        if let Err(e) = self.decisions.acknowledge(&checkpoint).await {
            warn!(session = id, error = %e, "Could not show completion checkpoint");
        }
        Ok(SessionOutcome::Completed {
            commit: commit.to_string(),
        })
    }

    /// Record an executor failure and turn it into the error the caller sees.
    async fn fail(&self, id: SessionId, stage: Stage, error: anyhow::Error) -> SessionError {
        let message = format!("{:#}", error);
        warn!(session = id, %stage, error = %message, "Executor failed");
        let max_retries = self.config.max_retries;
        let recorded = self
            .state
            .update_session(id, |s| {
                let exhausted = s.record_error(stage.as_str(), &message, false, max_retries, Utc::now());
                Ok((exhausted, s.retry_count))
            })
            .await;

        match recorded {
            Ok((true, retries)) => SessionError::RetryExhausted {
                session: id,
                retries,
            },
            Ok((false, _)) => SessionError::Executor {
                session: id,
                stage: stage.to_string(),
                message,
            },
            Err(e) => e,
        }
    }

    async fn context(&self, id: SessionId, attempt: u32) -> Result<ExecutionContext, SessionError> {
        self.state
            .read(|state| {
                let phase = state.phase_of(id)?;
                Some(ExecutionContext {
                    project: state.project.clone(),
                    phase_number: phase.number,
                    phase_name: phase.name.clone(),
                    session: phase.session(id)?.clone(),
                    attempt,
                })
            })
            .await
            .ok_or(SessionError::NotFound(id))
    }

    /// The executor that would handle a session, if any.
    pub fn executor_for(&self, domain: crate::state::Domain) -> Option<Arc<dyn SessionExecutor>> {
        self.executors.resolve(domain)
    }
}
