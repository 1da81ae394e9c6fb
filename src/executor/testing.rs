//! Scriptable in-memory executor for unit tests.

use super::{ExecutionContext, SessionExecutor, Stage, StageReport};
use crate::state::SessionId;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<(SessionId, Stage)>>,
    failures: Mutex<HashMap<(SessionId, Stage), u32>>,
    reports: Mutex<HashMap<(SessionId, Stage), StageReport>>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` calls of `stage` for `session`.
    pub fn fail(self, session: SessionId, stage: Stage, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((session, stage), times);
        self
    }

    pub fn report(self, session: SessionId, stage: Stage, report: StageReport) -> Self {
        self.reports
            .lock()
            .unwrap()
            .insert((session, stage), report);
        self
    }

    pub fn calls(&self) -> Vec<(SessionId, Stage)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, session: SessionId) -> Vec<Stage> {
        self.calls()
            .into_iter()
            .filter(|(id, _)| *id == session)
            .map(|(_, stage)| stage)
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn call(&self, ctx: &ExecutionContext, stage: Stage) -> Result<StageReport> {
        let id = ctx.session.id;
        self.calls.lock().unwrap().push((id, stage));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&(id, stage))
                && *left > 0
            {
                *left -= 1;
                bail!("{} stage failed for session {}", stage, id);
            }
        }

        if let Some(report) = self.reports.lock().unwrap().get(&(id, stage)) {
            return Ok(report.clone());
        }
        Ok(match stage {
            Stage::Red => StageReport {
                tests_written: 4,
                tests_failing: 4,
                files: vec![format!("tests/session_{id}.rs")],
                ..Default::default()
            },
            Stage::Green => StageReport {
                tests_passing: 4,
                coverage: Some(88.0),
                files: vec![format!("src/session_{id}.rs")],
                ..Default::default()
            },
            Stage::Refactor | Stage::Commit => StageReport {
                tests_passing: 4,
                coverage: Some(91.0),
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl SessionExecutor for MockExecutor {
    async fn execute_red_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.call(ctx, Stage::Red).await
    }

    async fn execute_green_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.call(ctx, Stage::Green).await
    }

    async fn execute_refactor_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.call(ctx, Stage::Refactor).await
    }

    async fn create_commit(&self, ctx: &ExecutionContext) -> Result<String> {
        self.call(ctx, Stage::Commit).await?;
        Ok(format!("commit-{}", ctx.session.id))
    }
}
