//! Outcome of a phase run.

use crate::state::SessionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A session that failed during the run, or was already in ERROR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub session: SessionId,
    pub error: String,
    pub retry_count: u32,
}

/// What happened to every session of a phase during one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseRunResult {
    pub phase: u32,
    pub total_sessions: usize,
    /// Completed, including sessions completed by earlier runs
    pub completed: Vec<SessionId>,
    pub failed: Vec<SessionFailure>,
    pub skipped: Vec<SessionId>,
    /// Stopped at a checkpoint awaiting a decision
    pub paused: Vec<SessionId>,
    /// Held by an unresolved blocker
    pub blocked: Vec<SessionId>,
    /// Not started because a dependency is paused, blocked, or in another phase
    pub waiting: Vec<SessionId>,
    /// Not started because a dependency failed or was skipped
    pub unreachable: Vec<SessionId>,
    /// True when some session can never become runnable
    pub deadlocked: bool,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl PhaseRunResult {
    pub fn new(phase: u32, total_sessions: usize) -> Self {
        Self {
            phase,
            total_sessions,
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, session: SessionId, error: &str, retry_count: u32) {
        self.failed.push(SessionFailure {
            session,
            error: error.to_string(),
            retry_count,
        });
    }

    /// Every session COMPLETED or SKIPPED.
    pub fn is_complete(&self) -> bool {
        self.completed.len() + self.skipped.len() == self.total_sessions
    }

    /// Nothing failed and nothing is stuck.
    pub fn success(&self) -> bool {
        self.failed.is_empty() && !self.deadlocked
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total_sessions == 0 {
            return 100.0;
        }
        (self.completed.len() as f64 / self.total_sessions as f64) * 100.0
    }

    pub fn failure_for(&self, session: SessionId) -> Option<&SessionFailure> {
        self.failed.iter().find(|f| f.session == session)
    }

    /// Put every list in id order.
    pub(crate) fn normalize(&mut self) {
        self.completed.sort_unstable();
        self.skipped.sort_unstable();
        self.paused.sort_unstable();
        self.blocked.sort_unstable();
        self.waiting.sort_unstable();
        self.unreachable.sort_unstable();
        self.failed.sort_by_key(|f| f.session);
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
