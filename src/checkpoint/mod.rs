//! Human-approval checkpoints.
//!
//! Five gates sit at fixed points of a session's lifecycle. A gate is built
//! from the metrics gathered so far, recorded onto the session while it
//! waits, and resolved by a [`CheckpointAction`]. The mapping from
//! (gate, action) to the next status is [`handle_checkpoint_response`], a
//! pure function.

use crate::errors::SessionError;
use crate::state::{
    AgentState, PendingCheckpoint, Session, SessionId, SessionStatus, StatusKind, TddPhase,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Touched files beyond this are summarized as a count.
pub const MAX_DISPLAY_FILES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    BeforeStart,
    AfterRed,
    AfterGreen,
    AfterRefactor,
    SessionComplete,
}

impl CheckpointType {
    /// TDD phase this gate follows, if any.
    pub fn gated_phase(&self) -> Option<TddPhase> {
        match self {
            CheckpointType::AfterRed => Some(TddPhase::Red),
            CheckpointType::AfterGreen => Some(TddPhase::Green),
            CheckpointType::AfterRefactor => Some(TddPhase::Refactor),
            CheckpointType::BeforeStart | CheckpointType::SessionComplete => None,
        }
    }

    /// Gate reached once `phase` has run.
    pub fn after(phase: TddPhase) -> Self {
        match phase {
            TddPhase::Red => CheckpointType::AfterRed,
            TddPhase::Green => CheckpointType::AfterGreen,
            TddPhase::Refactor => CheckpointType::AfterRefactor,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CheckpointType::BeforeStart => "BEFORE_START",
            CheckpointType::AfterRed => "AFTER_RED",
            CheckpointType::AfterGreen => "AFTER_GREEN",
            CheckpointType::AfterRefactor => "AFTER_REFACTOR",
            CheckpointType::SessionComplete => "SESSION_COMPLETE",
        }
    }

    /// Status a session holds while the gated work runs.
    fn stage_status(&self) -> StatusKind {
        match self.gated_phase() {
            Some(phase) => StatusKind::for_phase(phase),
            None if *self == CheckpointType::SessionComplete => StatusKind::Completed,
            None => StatusKind::InProgress,
        }
    }
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointAction {
    Proceed,
    Retry,
    Skip,
    Pause,
    Modify,
}

impl fmt::Display for CheckpointAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckpointAction::Proceed => "proceed",
            CheckpointAction::Retry => "retry",
            CheckpointAction::Skip => "skip",
            CheckpointAction::Pause => "pause",
            CheckpointAction::Modify => "modify",
        })
    }
}

impl std::str::FromStr for CheckpointAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proceed" | "p" | "yes" | "y" => Ok(CheckpointAction::Proceed),
            "retry" | "r" => Ok(CheckpointAction::Retry),
            "skip" | "s" => Ok(CheckpointAction::Skip),
            "pause" => Ok(CheckpointAction::Pause),
            "modify" | "m" => Ok(CheckpointAction::Modify),
            _ => anyhow::bail!(
                "Invalid action '{}'. Valid values: proceed, retry, skip, pause, modify",
                s
            ),
        }
    }
}

/// Metrics available at a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub tests_written: u32,
    pub tests_passing: u32,
    pub tests_failing: u32,
    pub coverage: Option<f64>,
    pub files: Vec<String>,
}

impl From<&Session> for CheckpointMetrics {
    fn from(session: &Session) -> Self {
        Self {
            tests_written: session.metrics.tests_written,
            tests_passing: session.metrics.tests_passing,
            tests_failing: session.metrics.tests_failing,
            coverage: session.metrics.coverage,
            files: session.modified_files.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointOption {
    /// 1-based number shown to the operator
    pub key: usize,
    pub label: String,
    pub action: CheckpointAction,
}

/// A gate as presented to whoever decides it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub kind: CheckpointType,
    pub session_id: SessionId,
    pub session_title: String,
    pub message: String,
    pub metrics: CheckpointMetrics,
    pub options: Vec<CheckpointOption>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build the gate of type `kind` for a session's current metrics.
    pub fn new(kind: CheckpointType, session: &Session) -> Self {
        let metrics = CheckpointMetrics::from(session);
        let message = match kind {
            CheckpointType::BeforeStart => format!(
                "Session #{} '{}' is ready to start; all dependencies are complete.",
                session.id, session.title
            ),
            CheckpointType::AfterRed => format!(
                "RED phase complete: {} tests written, {} failing.",
                metrics.tests_written, metrics.tests_failing
            ),
            CheckpointType::AfterGreen => format!(
                "GREEN phase complete: {}/{} tests passing{}.",
                metrics.tests_passing,
                metrics.tests_written,
                coverage_suffix(metrics.coverage)
            ),
            CheckpointType::AfterRefactor => format!(
                "REFACTOR phase complete{}. Ready to commit.",
                coverage_suffix(metrics.coverage)
            ),
            CheckpointType::SessionComplete => match session.commit() {
                Some(commit) => format!("Session #{} complete at {}.", session.id, commit),
                None => format!("Session #{} complete.", session.id),
            },
        };

        Self {
            kind,
            session_id: session.id,
            session_title: session.title.clone(),
            message,
            metrics,
            options: options_for(kind),
            created_at: Utc::now(),
        }
    }

    pub fn before_start(session: &Session) -> Self {
        Self::new(CheckpointType::BeforeStart, session)
    }

    pub fn after_red(session: &Session) -> Self {
        Self::new(CheckpointType::AfterRed, session)
    }

    pub fn after_green(session: &Session) -> Self {
        Self::new(CheckpointType::AfterGreen, session)
    }

    pub fn after_refactor(session: &Session) -> Self {
        Self::new(CheckpointType::AfterRefactor, session)
    }

    pub fn session_complete(session: &Session) -> Self {
        Self::new(CheckpointType::SessionComplete, session)
    }

    /// Action bound to a displayed option number.
    pub fn action_for_key(&self, key: usize) -> Option<CheckpointAction> {
        self.options.iter().find(|o| o.key == key).map(|o| o.action)
    }

    /// Data for a human-readable rendering of this gate.
    pub fn display(&self) -> CheckpointDisplay {
        let m = &self.metrics;
        let mut metrics = vec![
            ("Tests written".to_string(), m.tests_written.to_string()),
            ("Tests passing".to_string(), m.tests_passing.to_string()),
            ("Tests failing".to_string(), m.tests_failing.to_string()),
        ];
        if let Some(coverage) = m.coverage {
            metrics.push(("Coverage".to_string(), format!("{:.1}%", coverage)));
        }

        CheckpointDisplay {
            title: self.kind.label().to_string(),
            session: format!("#{} {}", self.session_id, self.session_title),
            message: self.message.clone(),
            metrics,
            files: m.files.iter().take(MAX_DISPLAY_FILES).cloned().collect(),
            hidden_files: m.files.len().saturating_sub(MAX_DISPLAY_FILES),
            options: self
                .options
                .iter()
                .map(|o| format!("{}. {}", o.key, o.label))
                .collect(),
        }
    }
}

fn coverage_suffix(coverage: Option<f64>) -> String {
    coverage
        .map(|c| format!(", coverage {:.1}%", c))
        .unwrap_or_default()
}

fn options_for(kind: CheckpointType) -> Vec<CheckpointOption> {
    let entries: Vec<(&str, CheckpointAction)> = match kind {
        CheckpointType::BeforeStart => vec![
            ("Start the RED phase", CheckpointAction::Proceed),
            ("Skip this session", CheckpointAction::Skip),
            ("Pause here", CheckpointAction::Pause),
        ],
        CheckpointType::AfterRed => vec![
            ("Proceed to GREEN", CheckpointAction::Proceed),
            ("Re-run the RED phase", CheckpointAction::Retry),
            ("Modify the tests first", CheckpointAction::Modify),
            ("Skip this session", CheckpointAction::Skip),
            ("Pause here", CheckpointAction::Pause),
        ],
        CheckpointType::AfterGreen => vec![
            ("Proceed to REFACTOR", CheckpointAction::Proceed),
            ("Re-run the GREEN phase", CheckpointAction::Retry),
            ("Modify the implementation first", CheckpointAction::Modify),
            ("Skip this session", CheckpointAction::Skip),
            ("Pause here", CheckpointAction::Pause),
        ],
        CheckpointType::AfterRefactor => vec![
            ("Commit and complete", CheckpointAction::Proceed),
            ("Re-run the REFACTOR phase", CheckpointAction::Retry),
            ("Modify before committing", CheckpointAction::Modify),
            ("Skip this session", CheckpointAction::Skip),
            ("Pause here", CheckpointAction::Pause),
        ],
        CheckpointType::SessionComplete => {
            vec![("Continue", CheckpointAction::Proceed)]
        }
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (label, action))| CheckpointOption {
            key: i + 1,
            label: label.to_string(),
            action,
        })
        .collect()
}

/// Rendering-ready view of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointDisplay {
    pub title: String,
    pub session: String,
    pub message: String,
    pub metrics: Vec<(String, String)>,
    pub files: Vec<String>,
    pub hidden_files: usize,
    pub options: Vec<String>,
}

/// Pause a session at a checkpoint.
pub fn activate_checkpoint(session: &mut Session, checkpoint: &Checkpoint) {
    let tdd_phase = checkpoint.kind.gated_phase();
    if tdd_phase.is_some() {
        session.current_tdd_phase = tdd_phase;
    }
    session.status = SessionStatus::AwaitingApproval {
        checkpoint: PendingCheckpoint {
            kind: checkpoint.kind,
            tdd_phase,
            decision: None,
        },
    };
}

/// Where a decision sends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: StatusKind,
    pub tdd_phase: Option<TddPhase>,
}

/// Next `(status, tdd_phase)` for a decision at a checkpoint.
///
/// RETRY keeps the status the session had while the gated work ran, so the
/// orchestrator re-invokes that same stage.
pub fn handle_checkpoint_response(kind: CheckpointType, action: CheckpointAction) -> Transition {
    let gated = kind.gated_phase();
    match action {
        CheckpointAction::Proceed => match kind {
            CheckpointType::BeforeStart => Transition {
                status: StatusKind::RedPhase,
                tdd_phase: Some(TddPhase::Red),
            },
            CheckpointType::AfterRed => Transition {
                status: StatusKind::GreenPhase,
                tdd_phase: Some(TddPhase::Green),
            },
            CheckpointType::AfterGreen => Transition {
                status: StatusKind::RefactorPhase,
                tdd_phase: Some(TddPhase::Refactor),
            },
            CheckpointType::AfterRefactor | CheckpointType::SessionComplete => Transition {
                status: StatusKind::Completed,
                tdd_phase: None,
            },
        },
        CheckpointAction::Skip => Transition {
            status: StatusKind::Skipped,
            tdd_phase: gated,
        },
        CheckpointAction::Pause | CheckpointAction::Modify => Transition {
            status: StatusKind::AwaitingApproval,
            tdd_phase: gated,
        },
        CheckpointAction::Retry => Transition {
            status: kind.stage_status(),
            tdd_phase: gated,
        },
    }
}

/// Apply a transition to a session paused at `kind`.
///
/// A COMPLETED target is not applied directly: completion has to pass
/// validation, so the session keeps its checkpoint with the PROCEED decision
/// recorded until the commit lands.
pub fn apply_transition(session: &mut Session, kind: CheckpointType, transition: Transition) {
    match transition.status {
        StatusKind::Skipped => {
            session.status = SessionStatus::Skipped;
        }
        StatusKind::AwaitingApproval => {
            session.status = SessionStatus::AwaitingApproval {
                checkpoint: PendingCheckpoint {
                    kind,
                    tdd_phase: transition.tdd_phase,
                    decision: None,
                },
            };
        }
        StatusKind::Completed => {
            if let SessionStatus::AwaitingApproval { checkpoint } = &mut session.status {
                checkpoint.decision = Some(CheckpointAction::Proceed);
            }
        }
        StatusKind::InProgress => {
            session.status = SessionStatus::InProgress;
        }
        StatusKind::RedPhase | StatusKind::GreenPhase | StatusKind::RefactorPhase => {
            if let Some(phase) = transition.tdd_phase {
                session.enter_phase(phase);
            }
        }
        StatusKind::NotStarted | StatusKind::Blocked | StatusKind::Error => {}
    }
}

/// Record an out-of-band decision for a session waiting at a checkpoint.
///
/// SKIP takes effect immediately. Any other action is stored on the pending
/// checkpoint and consumed when the session is next driven.
pub fn record_decision(
    state: &mut AgentState,
    id: SessionId,
    action: CheckpointAction,
) -> Result<StatusKind, SessionError> {
    let session = state.session_mut(id).ok_or(SessionError::NotFound(id))?;
    let SessionStatus::AwaitingApproval { checkpoint } = &mut session.status else {
        return Err(SessionError::NoPendingCheckpoint(id));
    };
    if action == CheckpointAction::Skip {
        session.status = SessionStatus::Skipped;
    } else {
        checkpoint.decision = Some(action);
    }
    Ok(session.kind())
}
