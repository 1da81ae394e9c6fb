//! Typed error hierarchy for the cadence orchestrator.
//!
//! Three top-level enums cover the three layers callers match on:
//! - `GraphError`: malformed or cyclic session dependency declarations
//! - `SessionError`: driving a single session through its TDD lifecycle
//! - `SchedulerError`: driving a whole phase
//!
//! `ValidationFailure` explains why a completion attempt was refused.

use crate::scheduler::PhaseRunResult;
use crate::state::{Domain, SessionId, StatusKind};
use thiserror::Error;

/// Errors from dependency graph construction and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate session id: {0}")]
    DuplicateSession(SessionId),

    #[error("Unknown dependency {dependency} in session {session}: no session with that id exists")]
    MissingDependency {
        session: SessionId,
        dependency: SessionId,
    },

    #[error("Cycle detected in session dependencies: {}", format_cycles(.cycles))]
    CycleDetected { cycles: Vec<Vec<SessionId>> },
}

fn format_cycles(cycles: &[Vec<SessionId>]) -> String {
    cycles
        .iter()
        .map(|cycle| format!("{:?}", cycle))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why a session was refused completion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("only {passing} of {written} tests passing")]
    TestsNotPassing { passing: u32, written: u32 },

    #[error("coverage {coverage:.1}% is below the {threshold:.1}% threshold")]
    InsufficientCoverage { coverage: f64, threshold: f64 },

    #[error("no commit identifier supplied")]
    MissingCommit,
}

/// Errors from driving a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Session {session} cannot start: dependencies not completed: {pending:?}")]
    DependencyNotSatisfied {
        session: SessionId,
        pending: Vec<SessionId>,
    },

    #[error("Session {session} cannot complete: {failure}")]
    Validation {
        session: SessionId,
        #[source]
        failure: ValidationFailure,
    },

    #[error("Executor failed for session {session} during {stage}: {message}")]
    Executor {
        session: SessionId,
        stage: String,
        message: String,
    },

    #[error("Session {session} exhausted its retry budget after {retries} errors")]
    RetryExhausted { session: SessionId, retries: u32 },

    #[error("No executor registered for domain '{domain}' (session {session})")]
    NoExecutor { session: SessionId, domain: Domain },

    #[error("Session {session} is {status} and cannot be driven")]
    NotRunnable {
        session: SessionId,
        status: StatusKind,
    },

    #[error("Session {0} is not awaiting approval")]
    NoPendingCheckpoint(SessionId),

    #[error("Blocker {0} not found")]
    UnknownBlocker(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Errors from driving a phase.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Phase {0} not found")]
    PhaseNotFound(u32),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Stopped after session {session} failed: {error}")]
    StoppedOnError {
        session: SessionId,
        error: String,
        partial: Box<PhaseRunResult>,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
