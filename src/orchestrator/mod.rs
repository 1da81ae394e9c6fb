//! Single-session state machine.
//!
//! [`SessionOrchestrator::drive`] takes one session from wherever its
//! persisted status says it is to COMPLETED, SKIPPED, or a pause at a
//! checkpoint. The actual work is delegated to the session's executor.

mod runner;

pub use runner::SessionOrchestrator;

use crate::checkpoint::CheckpointType;
use crate::state::CoverageThresholds;

/// Limits applied while driving sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    /// `retry_count` beyond this forces ERROR
    pub max_retries: u32,
    pub coverage: CoverageThresholds,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            coverage: CoverageThresholds::default(),
        }
    }
}

/// How a drive ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { commit: String },
    Skipped,
    /// Waiting at a checkpoint for an out-of-band decision
    Paused { checkpoint: CheckpointType },
}
