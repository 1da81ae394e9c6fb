//! The executor contract.
//!
//! How tests get written and code gets implemented is not this crate's
//! business. A [`SessionExecutor`] does the work for one stage and reports
//! counts back; the [`ExecutorRegistry`] picks an executor by the session's
//! domain.

mod command;
#[cfg(test)]
pub(crate) mod testing;

pub use command::{CommandExecutor, extract_json_object};

use crate::state::{Domain, Session, SessionMetrics, TddPhase};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Unit of executor work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Red,
    Green,
    Refactor,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Red => "red",
            Stage::Green => "green",
            Stage::Refactor => "refactor",
            Stage::Commit => "commit",
        }
    }
}

impl From<TddPhase> for Stage {
    fn from(phase: TddPhase) -> Self {
        match phase {
            TddPhase::Red => Stage::Red,
            TddPhase::Green => Stage::Green,
            TddPhase::Refactor => Stage::Refactor,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an executor reports after a TDD stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageReport {
    pub tests_written: u32,
    pub tests_passing: u32,
    pub tests_failing: u32,
    pub coverage: Option<f64>,
    pub files: Vec<String>,
    /// Problems the executor hit and fixed on its own
    pub recovered_errors: Vec<String>,
}

impl StageReport {
    /// Fold this report into a session's metrics.
    ///
    /// The stage's counts replace whatever an earlier run of the same stage
    /// recorded. RED defines the written-test count; later stages only
    /// override it when they report one.
    pub fn apply_to(&self, phase: TddPhase, metrics: &mut SessionMetrics) {
        match phase {
            TddPhase::Red => {
                metrics.tests_written = self.tests_written;
                metrics.tests_passing = self.tests_passing;
                metrics.tests_failing = self.tests_failing;
                if self.coverage.is_some() {
                    metrics.coverage = self.coverage;
                }
            }
            TddPhase::Green | TddPhase::Refactor => {
                if self.tests_written > 0 {
                    metrics.tests_written = self.tests_written;
                }
                metrics.tests_passing = self.tests_passing;
                metrics.tests_failing = self.tests_failing;
                if self.coverage.is_some() {
                    metrics.coverage = self.coverage;
                }
            }
        }
    }
}

/// Everything an executor is told about the work at hand.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub project: String,
    pub phase_number: u32,
    pub phase_name: String,
    pub session: Session,
    /// 1 on the first run of a stage, incremented on each retry
    pub attempt: u32,
}

#[async_trait]
pub trait SessionExecutor: Send + Sync {
    async fn execute_red_phase(&self, ctx: &ExecutionContext) -> Result<StageReport>;

    async fn execute_green_phase(&self, ctx: &ExecutionContext) -> Result<StageReport>;

    async fn execute_refactor_phase(&self, ctx: &ExecutionContext) -> Result<StageReport>;

    /// Commit the session's work, returning an opaque commit id.
    async fn create_commit(&self, ctx: &ExecutionContext) -> Result<String>;
}

/// Dispatch a TDD phase to the matching executor operation.
pub async fn run_stage(
    executor: &dyn SessionExecutor,
    phase: TddPhase,
    ctx: &ExecutionContext,
) -> Result<StageReport> {
    match phase {
        TddPhase::Red => executor.execute_red_phase(ctx).await,
        TddPhase::Green => executor.execute_green_phase(ctx).await,
        TddPhase::Refactor => executor.execute_refactor_phase(ctx).await,
    }
}

/// Domain → executor routing.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Domain, Arc<dyn SessionExecutor>>,
    fallback: Option<Arc<dyn SessionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every domain to one executor.
    pub fn uniform(executor: Arc<dyn SessionExecutor>) -> Self {
        Self {
            executors: HashMap::new(),
            fallback: Some(executor),
        }
    }

    pub fn register(mut self, domain: Domain, executor: Arc<dyn SessionExecutor>) -> Self {
        self.executors.insert(domain, executor);
        self
    }

    /// Executor used for domains without their own registration.
    pub fn with_fallback(mut self, executor: Arc<dyn SessionExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    pub fn resolve(&self, domain: Domain) -> Option<Arc<dyn SessionExecutor>> {
        self.executors
            .get(&domain)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    /// Domains that have a dedicated executor.
    pub fn domains(&self) -> Vec<Domain> {
        let mut domains: Vec<Domain> = self.executors.keys().copied().collect();
        domains.sort();
        domains
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty() && self.fallback.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl SessionExecutor for Fixed {
        async fn execute_red_phase(&self, _ctx: &ExecutionContext) -> Result<StageReport> {
            Ok(StageReport {
                tests_written: 3,
                tests_failing: 3,
                ..Default::default()
            })
        }
        async fn execute_green_phase(&self, _ctx: &ExecutionContext) -> Result<StageReport> {
            Ok(StageReport::default())
        }
        async fn execute_refactor_phase(&self, _ctx: &ExecutionContext) -> Result<StageReport> {
            Ok(StageReport::default())
        }
        async fn create_commit(&self, _ctx: &ExecutionContext) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            project: "demo".into(),
            phase_number: 1,
            phase_name: "Core".into(),
            session: Session::new(1, "API", Domain::Backend),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_registry_routes_by_domain_then_fallback() {
        let registry = ExecutorRegistry::new()
            .register(Domain::Frontend, Arc::new(Fixed("frontend")))
            .with_fallback(Arc::new(Fixed("fallback")));

        let frontend = registry.resolve(Domain::Frontend).unwrap();
        assert_eq!(frontend.create_commit(&ctx()).await.unwrap(), "frontend");
        let backend = registry.resolve(Domain::Backend).unwrap();
        assert_eq!(backend.create_commit(&ctx()).await.unwrap(), "fallback");
        assert_eq!(registry.domains(), vec![Domain::Frontend]);
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        let registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve(Domain::Mobile).is_none());
    }

    #[tokio::test]
    async fn test_run_stage_dispatches() {
        let report = run_stage(&Fixed("x"), TddPhase::Red, &ctx()).await.unwrap();
        assert_eq!(report.tests_written, 3);
    }

    #[test]
    fn test_report_replaces_stage_metrics() {
        let mut metrics = SessionMetrics::default();
        let red = StageReport {
            tests_written: 5,
            tests_failing: 5,
            ..Default::default()
        };
        red.apply_to(TddPhase::Red, &mut metrics);
        assert_eq!((metrics.tests_written, metrics.tests_failing), (5, 5));

        let green = StageReport {
            tests_passing: 4,
            tests_failing: 1,
            coverage: Some(81.0),
            ..Default::default()
        };
        green.apply_to(TddPhase::Green, &mut metrics);
        assert_eq!(metrics.tests_written, 5);
        assert_eq!(metrics.tests_passing, 4);

        let retried = StageReport {
            tests_passing: 5,
            coverage: Some(85.0),
            ..Default::default()
        };
        retried.apply_to(TddPhase::Green, &mut metrics);
        assert_eq!(metrics.tests_passing, 5);
        assert_eq!(metrics.tests_failing, 0);
        assert_eq!(metrics.coverage, Some(85.0));
    }

    #[test]
    fn test_report_deserializes_partial_json() {
        let report: StageReport = serde_json::from_str(r#"{"tests_written": 2}"#).unwrap();
        assert_eq!(report.tests_written, 2);
        assert!(report.files.is_empty());
        assert!(report.coverage.is_none());
    }
}
