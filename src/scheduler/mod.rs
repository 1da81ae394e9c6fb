//! Phase scheduler.
//!
//! Drives every session of a phase to a settled state: launches sessions
//! whose dependencies are COMPLETED, up to a concurrency ceiling, and blocks
//! on a completion channel until one settles before re-evaluating. One
//! session's failure only stops the sessions that depend on it, unless
//! `stop_on_error` is set.

mod result;
mod runner;

pub use result::{PhaseRunResult, SessionFailure};
pub use runner::PhaseScheduler;

use serde::{Deserialize, Serialize};

/// Configuration for the phase scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum sessions in flight at once
    pub max_concurrent: usize,
    /// Stop launching after the first failure
    pub stop_on_error: bool,
    /// Run sessions one at a time, inline
    pub sequential: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            stop_on_error: false,
            sequential: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Effective ceiling; zero is treated as one.
    pub fn concurrency(&self) -> usize {
        if self.sequential {
            1
        } else {
            self.max_concurrent.max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_ceiling() {
        assert_eq!(SchedulerConfig::default().concurrency(), 2);
        assert_eq!(SchedulerConfig::default().with_max_concurrent(0).concurrency(), 1);
        assert_eq!(
            SchedulerConfig::default()
                .with_max_concurrent(8)
                .with_sequential(true)
                .concurrency(),
            1
        );
    }
}
