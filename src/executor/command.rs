//! Executor that shells out to a configured command per domain.
//!
//! The command is run once per stage with `CADENCE_*` environment variables
//! describing the work. For TDD stages, stdout must contain a JSON object
//! shaped like [`StageReport`]; for the commit stage the last non-empty
//! stdout line is the commit id. A non-zero exit is a failure.

use super::{ExecutionContext, SessionExecutor, Stage, StageReport};
use crate::config::ExecutorCommandConfig;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct CommandExecutor {
    config: ExecutorCommandConfig,
    working_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new(config: ExecutorCommandConfig, working_dir: PathBuf) -> Self {
        Self {
            config,
            working_dir,
        }
    }

    async fn run(&self, stage: Stage, ctx: &ExecutionContext) -> Result<String> {
        let session = &ctx.session;
        let depends_on = session
            .depends_on
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(&self.working_dir)
            .env("CADENCE_STAGE", stage.as_str())
            .env("CADENCE_PROJECT", &ctx.project)
            .env("CADENCE_PHASE", ctx.phase_number.to_string())
            .env("CADENCE_PHASE_NAME", &ctx.phase_name)
            .env("CADENCE_SESSION_ID", session.id.to_string())
            .env("CADENCE_SESSION_TITLE", &session.title)
            .env("CADENCE_DOMAIN", session.domain.as_str())
            .env("CADENCE_DEPENDS_ON", depends_on)
            .env("CADENCE_ATTEMPT", ctx.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            command = %self.config.command,
            stage = %stage,
            session = session.id,
            "Spawning executor command"
        );

        let output = match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), cmd.output())
                .await
                .with_context(|| format!("Executor command timed out after {}s", secs))?,
            None => cmd.output().await,
        }
        .with_context(|| format!("Failed to run executor command '{}'", self.config.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {} during {} stage: {}",
                self.config.command,
                output.status,
                stage,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_report(&self, stage: Stage, ctx: &ExecutionContext) -> Result<StageReport> {
        let stdout = self.run(stage, ctx).await?;
        parse_report(&stdout).with_context(|| format!("Invalid {} stage report", stage))
    }
}

#[async_trait]
impl SessionExecutor for CommandExecutor {
    async fn execute_red_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.run_report(Stage::Red, ctx).await
    }

    async fn execute_green_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.run_report(Stage::Green, ctx).await
    }

    async fn execute_refactor_phase(&self, ctx: &ExecutionContext) -> Result<StageReport> {
        self.run_report(Stage::Refactor, ctx).await
    }

    async fn create_commit(&self, ctx: &ExecutionContext) -> Result<String> {
        let stdout = self.run(Stage::Commit, ctx).await?;
        stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .context("Commit stage printed no commit id")
    }
}

/// The last stdout line that is a JSON object wins; otherwise the first
/// object found anywhere in the output.
fn parse_report(stdout: &str) -> Result<StageReport> {
    if let Some(report) = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<StageReport>(line).ok())
    {
        return Ok(report);
    }
    let json = extract_json_object(stdout).context("No JSON object in executor output")?;
    serde_json::from_str(&json).context("Failed to parse executor JSON")
}

/// Extract the outermost JSON object from text that may contain other content.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
