//! Persisted orchestration state.
//!
//! `AgentState` is the root aggregate: an ordered list of phases, each holding
//! an ordered list of sessions, plus the blockers recorded against sessions.
//! Mutation happens in memory through the methods here; persistence is the
//! job of [`StateStore`] and the single-writer [`StateHandle`].

pub mod handle;
pub mod store;

pub use handle::StateHandle;
pub use store::StateStore;

use crate::checkpoint::{CheckpointAction, CheckpointType};
use crate::errors::{SessionError, ValidationFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Numeric session identity, unique within a plan.
pub type SessionId = u32;

/// Overall status of the orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::NotStarted => "not started",
            RunStatus::InProgress => "in progress",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Which kind of worker handles a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    #[default]
    Backend,
    Frontend,
    Mobile,
    E2e,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Backend, Domain::Frontend, Domain::Mobile, Domain::E2e];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Backend => "backend",
            Domain::Frontend => "frontend",
            Domain::Mobile => "mobile",
            Domain::E2e => "e2e",
        }
    }

    /// Server-side work is held to the higher coverage bar.
    pub fn tier(&self) -> CoverageTier {
        match self {
            Domain::Backend => CoverageTier::Server,
            Domain::Frontend | Domain::Mobile | Domain::E2e => CoverageTier::Client,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backend" => Ok(Domain::Backend),
            "frontend" => Ok(Domain::Frontend),
            "mobile" => Ok(Domain::Mobile),
            "e2e" => Ok(Domain::E2e),
            _ => anyhow::bail!(
                "Invalid domain '{}'. Valid values: backend, frontend, mobile, e2e",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageTier {
    Server,
    Client,
}

/// Minimum coverage (percent) required to complete a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageThresholds {
    pub server: f64,
    pub client: f64,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            server: 80.0,
            client: 70.0,
        }
    }
}

impl CoverageThresholds {
    pub fn for_domain(&self, domain: Domain) -> f64 {
        match domain.tier() {
            CoverageTier::Server => self.server,
            CoverageTier::Client => self.client,
        }
    }
}

/// One of the three TDD phases a session moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TddPhase {
    Red,
    Green,
    Refactor,
}

impl fmt::Display for TddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TddPhase::Red => "RED",
            TddPhase::Green => "GREEN",
            TddPhase::Refactor => "REFACTOR",
        })
    }
}

/// A checkpoint a session is paused at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCheckpoint {
    pub kind: CheckpointType,
    /// TDD phase being gated (RED/GREEN/REFACTOR checkpoints only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tdd_phase: Option<TddPhase>,
    /// Decision supplied out of band, consumed on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<CheckpointAction>,
}

/// Session lifecycle state. Fields only exist on the variants they are valid for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    InProgress,
    RedPhase,
    GreenPhase,
    RefactorPhase,
    AwaitingApproval {
        checkpoint: PendingCheckpoint,
    },
    Blocked {
        blocker_id: String,
        previous: Box<SessionStatus>,
    },
    Completed {
        commit: String,
        coverage: f64,
        completed_at: DateTime<Utc>,
        duration_secs: u64,
    },
    Skipped,
    Error {
        reason: String,
    },
}

/// Field-less mirror of [`SessionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    NotStarted,
    InProgress,
    RedPhase,
    GreenPhase,
    RefactorPhase,
    AwaitingApproval,
    Blocked,
    Completed,
    Skipped,
    Error,
}

impl StatusKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Error)
    }

    /// The working status for a TDD phase.
    pub fn for_phase(phase: TddPhase) -> Self {
        match phase {
            TddPhase::Red => Self::RedPhase,
            TddPhase::Green => Self::GreenPhase,
            TddPhase::Refactor => Self::RefactorPhase,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusKind::NotStarted => "NOT_STARTED",
            StatusKind::InProgress => "IN_PROGRESS",
            StatusKind::RedPhase => "RED_PHASE",
            StatusKind::GreenPhase => "GREEN_PHASE",
            StatusKind::RefactorPhase => "REFACTOR_PHASE",
            StatusKind::AwaitingApproval => "AWAITING_APPROVAL",
            StatusKind::Blocked => "BLOCKED",
            StatusKind::Completed => "COMPLETED",
            StatusKind::Skipped => "SKIPPED",
            StatusKind::Error => "ERROR",
        })
    }
}

impl SessionStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            SessionStatus::NotStarted => StatusKind::NotStarted,
            SessionStatus::InProgress => StatusKind::InProgress,
            SessionStatus::RedPhase => StatusKind::RedPhase,
            SessionStatus::GreenPhase => StatusKind::GreenPhase,
            SessionStatus::RefactorPhase => StatusKind::RefactorPhase,
            SessionStatus::AwaitingApproval { .. } => StatusKind::AwaitingApproval,
            SessionStatus::Blocked { .. } => StatusKind::Blocked,
            SessionStatus::Completed { .. } => StatusKind::Completed,
            SessionStatus::Skipped => StatusKind::Skipped,
            SessionStatus::Error { .. } => StatusKind::Error,
        }
    }

    /// Working status for a TDD phase.
    pub fn for_phase(phase: TddPhase) -> Self {
        match phase {
            TddPhase::Red => SessionStatus::RedPhase,
            TddPhase::Green => SessionStatus::GreenPhase,
            TddPhase::Refactor => SessionStatus::RefactorPhase,
        }
    }
}

/// Test and coverage counts gathered while a session runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub tests_written: u32,
    pub tests_passing: u32,
    pub tests_failing: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

/// One entry in a session's append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub stage: String,
    pub message: String,
    /// Errors the executor recovered from itself do not count against retries
    #[serde(default)]
    pub auto_fixed: bool,
}

/// The unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub domain: Domain,
    /// Sessions that must be COMPLETED before this one may start
    #[serde(default)]
    pub depends_on: BTreeSet<SessionId>,
    /// Inverse of `depends_on`, maintained by [`AgentState::rebuild_links`]
    #[serde(default)]
    pub blocks: BTreeSet<SessionId>,
    #[serde(default)]
    pub estimated_minutes: u32,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub current_tdd_phase: Option<TddPhase>,
    #[serde(default)]
    pub metrics: SessionMetrics,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, title: &str, domain: Domain) -> Self {
        Self {
            id,
            title: title.to_string(),
            domain,
            depends_on: BTreeSet::new(),
            blocks: BTreeSet::new(),
            estimated_minutes: 0,
            status: SessionStatus::NotStarted,
            current_tdd_phase: None,
            metrics: SessionMetrics::default(),
            retry_count: 0,
            errors: Vec::new(),
            modified_files: Vec::new(),
            started_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = SessionId>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_estimate(mut self, minutes: u32) -> Self {
        self.estimated_minutes = minutes;
        self
    }

    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, SessionStatus::Completed { .. })
    }

    /// The checkpoint this session is paused at, if any.
    pub fn checkpoint(&self) -> Option<&PendingCheckpoint> {
        match &self.status {
            SessionStatus::AwaitingApproval { checkpoint } => Some(checkpoint),
            _ => None,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        match &self.status {
            SessionStatus::Completed { commit, .. } => Some(commit),
            _ => None,
        }
    }

    /// Move into IN_PROGRESS. Dependency satisfaction is checked by the caller.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::InProgress;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Enter the working state for a TDD phase.
    pub fn enter_phase(&mut self, phase: TddPhase) {
        self.status = SessionStatus::for_phase(phase);
        self.current_tdd_phase = Some(phase);
    }

    /// Record touched files, keeping first-seen order and dropping repeats.
    pub fn record_files<'a>(&mut self, files: impl IntoIterator<Item = &'a String>) {
        for file in files {
            if !self.modified_files.contains(file) {
                self.modified_files.push(file.clone());
            }
        }
    }

    /// Append an error to the log.
    ///
    /// Errors that were not auto-fixed count against the retry budget; once
    /// `retry_count` exceeds `max_retries` the session is forced into ERROR.
    /// Returns `true` when that happened.
    pub fn record_error(
        &mut self,
        stage: &str,
        message: &str,
        auto_fixed: bool,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.errors.push(ErrorRecord {
            at: now,
            stage: stage.to_string(),
            message: message.to_string(),
            auto_fixed,
        });
        if auto_fixed {
            return false;
        }
        self.retry_count += 1;
        if self.retry_count > max_retries {
            self.status = SessionStatus::Error {
                reason: format!(
                    "retry budget exhausted after {} errors; last: {}",
                    self.retry_count, message
                ),
            };
            return true;
        }
        false
    }

    /// Validated completion.
    ///
    /// Refused (state untouched) unless every written test passes, coverage
    /// meets the domain's threshold, and a commit identifier is supplied.
    pub fn complete(
        &mut self,
        commit: &str,
        thresholds: &CoverageThresholds,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationFailure> {
        let metrics = &self.metrics;
        if metrics.tests_passing != metrics.tests_written {
            return Err(ValidationFailure::TestsNotPassing {
                passing: metrics.tests_passing,
                written: metrics.tests_written,
            });
        }
        let coverage = metrics.coverage.unwrap_or(0.0);
        let threshold = thresholds.for_domain(self.domain);
        if coverage < threshold {
            return Err(ValidationFailure::InsufficientCoverage {
                coverage,
                threshold,
            });
        }
        let commit = commit.trim();
        if commit.is_empty() {
            return Err(ValidationFailure::MissingCommit);
        }

        let duration_secs = self
            .started_at
            .map(|started| (now - started).num_seconds().max(0) as u64)
            .unwrap_or(0);
        self.status = SessionStatus::Completed {
            commit: commit.to_string(),
            coverage,
            completed_at: now,
            duration_secs,
        };
        self.current_tdd_phase = None;
        Ok(())
    }
}

/// Derived status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// An ordered group of sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Phase {
    pub fn new(number: u32, name: &str, sessions: Vec<Session>) -> Self {
        Self {
            number,
            name: name.to_string(),
            sessions,
            started_at: None,
            completed_at: None,
        }
    }

    /// Complete iff every session is COMPLETED or SKIPPED.
    pub fn is_complete(&self) -> bool {
        self.sessions
            .iter()
            .all(|s| matches!(s.kind(), StatusKind::Completed | StatusKind::Skipped))
    }

    pub fn status(&self) -> PhaseStatus {
        if self.is_complete() {
            PhaseStatus::Completed
        } else if self.sessions.iter().any(|s| s.kind() != StatusKind::NotStarted) {
            PhaseStatus::InProgress
        } else {
            PhaseStatus::NotStarted
        }
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id).collect()
    }
}

/// Where the orchestrator currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub phase: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

/// An external obstruction recorded against one session. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: String,
    pub session_id: SessionId,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Blocker {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// The root aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub project: String,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub current: Option<Cursor>,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub blockers: Vec<Blocker>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AgentState {
    /// Create a fresh state; `blocks` is derived from `depends_on`.
    pub fn new(project: &str, phases: Vec<Phase>) -> Self {
        let now = Utc::now();
        let mut state = Self {
            project: project.to_string(),
            status: RunStatus::NotStarted,
            current: None,
            phases,
            blockers: Vec::new(),
            created_at: now,
            last_updated_at: now,
        };
        state.rebuild_links();
        state
    }

    pub fn phase(&self, number: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.number == number)
    }

    pub fn phase_mut(&mut self, number: u32) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.number == number)
    }

    /// The phase containing a session.
    pub fn phase_of(&self, id: SessionId) -> Option<&Phase> {
        self.phases.iter().find(|p| p.session(id).is_some())
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.phases.iter().find_map(|p| p.session(id))
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.phases.iter_mut().find_map(|p| p.session_mut(id))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.phases.iter().flat_map(|p| p.sessions.iter())
    }

    pub fn is_completed(&self, id: SessionId) -> bool {
        self.session(id).is_some_and(Session::is_completed)
    }

    /// Dependencies of `id` that have not reached COMPLETED.
    pub fn pending_dependencies(&self, id: SessionId) -> Result<Vec<SessionId>, SessionError> {
        let session = self.session(id).ok_or(SessionError::NotFound(id))?;
        Ok(session
            .depends_on
            .iter()
            .copied()
            .filter(|dep| !self.is_completed(*dep))
            .collect())
    }

    /// Recompute every `blocks` set from the `depends_on` sets.
    pub fn rebuild_links(&mut self) {
        let mut inverse: HashMap<SessionId, BTreeSet<SessionId>> = HashMap::new();
        for session in self.sessions() {
            for dep in &session.depends_on {
                inverse.entry(*dep).or_default().insert(session.id);
            }
        }
        for phase in &mut self.phases {
            for session in &mut phase.sessions {
                session.blocks = inverse.remove(&session.id).unwrap_or_default();
            }
        }
    }

    /// Pairs `(i, j)` where exactly one of "`i` blocks `j`" and "`j` depends on `i`" holds.
    pub fn link_violations(&self) -> Vec<(SessionId, SessionId)> {
        let mut violations = Vec::new();
        for session in self.sessions() {
            for blocked in &session.blocks {
                let consistent = self
                    .session(*blocked)
                    .is_some_and(|other| other.depends_on.contains(&session.id));
                if !consistent {
                    violations.push((session.id, *blocked));
                }
            }
            for dep in &session.depends_on {
                let consistent = self
                    .session(*dep)
                    .is_some_and(|other| other.blocks.contains(&session.id));
                if !consistent {
                    violations.push((*dep, session.id));
                }
            }
        }
        violations.sort_unstable();
        violations.dedup();
        violations
    }

    /// Record an obstruction and move the session to BLOCKED.
    pub fn add_blocker(
        &mut self,
        session_id: SessionId,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        let session = self
            .session_mut(session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        let kind = session.kind();
        if kind.is_terminal() || kind == StatusKind::Blocked {
            return Err(SessionError::NotRunnable {
                session: session_id,
                status: kind,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let previous = std::mem::take(&mut session.status);
        session.status = SessionStatus::Blocked {
            blocker_id: id.clone(),
            previous: Box::new(previous),
        };
        self.blockers.push(Blocker {
            id: id.clone(),
            session_id,
            description: description.to_string(),
            created_at: now,
            resolved_at: None,
        });
        Ok(id)
    }

    /// Mark a blocker resolved and restore the session's prior status.
    ///
    /// Resolving an already-resolved blocker is a no-op.
    pub fn resolve_blocker(&mut self, blocker_id: &str, now: DateTime<Utc>) -> Result<(), SessionError> {
        let blocker = self
            .blockers
            .iter_mut()
            .find(|b| b.id == blocker_id)
            .ok_or_else(|| SessionError::UnknownBlocker(blocker_id.to_string()))?;
        if blocker.is_resolved() {
            return Ok(());
        }
        blocker.resolved_at = Some(now);
        let session_id = blocker.session_id;

        if let Some(session) = self.session_mut(session_id)
            && let SessionStatus::Blocked {
                blocker_id: current,
                previous,
            } = &session.status
            && current == blocker_id
        {
            session.status = (**previous).clone();
        }
        Ok(())
    }

    pub fn open_blockers(&self) -> impl Iterator<Item = &Blocker> {
        self.blockers.iter().filter(|b| !b.is_resolved())
    }

    /// Derive the overall run status from the sessions.
    pub fn refresh_status(&mut self) {
        let sessions: Vec<StatusKind> = self.sessions().map(Session::kind).collect();
        self.status = if self.phases.iter().all(Phase::is_complete) {
            RunStatus::Completed
        } else if sessions.contains(&StatusKind::AwaitingApproval) {
            RunStatus::Paused
        } else if sessions.contains(&StatusKind::Error) {
            RunStatus::Error
        } else if sessions.iter().any(|k| *k != StatusKind::NotStarted) {
            RunStatus::InProgress
        } else {
            RunStatus::NotStarted
        };
    }

    /// Count of sessions COMPLETED or SKIPPED, and the total.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.sessions().count();
        let done = self
            .sessions()
            .filter(|s| matches!(s.kind(), StatusKind::Completed | StatusKind::Skipped))
            .count();
        (done, total)
    }
}
