//! Phase execution: `cadence run`.

use anyhow::{Result, bail};
use cadence::config::CadenceConfig;
use cadence::errors::SchedulerError;
use cadence::events::EventSink;
use cadence::gates::{ApprovalGate, AutoApprove, DecisionSource};
use cadence::orchestrator::SessionOrchestrator;
use cadence::scheduler::{PhaseRunResult, PhaseScheduler};
use cadence::state::StateHandle;
use cadence::ui::{RunUI, UiMode, render};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::super::Cli;
use super::load_state;

/// Flags of the `run` command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub phase: Option<u32>,
    pub max_concurrent: Option<usize>,
    pub stop_on_error: bool,
    pub sequential: bool,
    pub ui: String,
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, options: RunOptions) -> Result<()> {
    let mut config = CadenceConfig::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    config.cli_max_concurrent = options.max_concurrent;
    config.cli_stop_on_error = options.stop_on_error;
    config.cli_sequential = options.sequential;

    for warning in config.validate() {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let (store, state) = load_state(&config)?;
    let registry = config.executor_registry()?;
    if registry.is_empty() {
        bail!(
            "No executors configured. Add an [executors.default] table to {}",
            config.config_file().display()
        );
    }

    let auto_approve = config.auto_approve();
    let decisions: Arc<dyn DecisionSource> = if auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(ApprovalGate::new(false))
    };

    // Prompts and progress bars cannot share the terminal.
    let mut mode = UiMode::parse(&options.ui);
    if !auto_approve && mode == UiMode::Full {
        mode = UiMode::Minimal;
    }

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let handle = StateHandle::new(state, store);
    let orchestrator = SessionOrchestrator::new(
        handle,
        registry,
        decisions,
        config.orchestrator_config(),
    )
    .with_events(EventSink::new(event_tx));
    let scheduler = PhaseScheduler::new(orchestrator, config.scheduler_config());
    info!(
        max_concurrent = scheduler.config().concurrency(),
        sequential = scheduler.config().sequential,
        "Starting run"
    );

    let ui = Arc::new(RunUI::new(mode, cli.verbose));
    let ui_task = {
        let ui = ui.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                ui.handle_event(&event);
            }
        })
    };

    let outcome = match options.phase {
        Some(number) => scheduler.run_phase(number).await.map(|r| vec![r]),
        None => scheduler.run_all().await,
    };
    // Closes the event channel so the UI task drains and exits.
    drop(scheduler);
    let _ = ui_task.await;
    ui.finish();

    match outcome {
        Ok(results) => {
            report(&results, mode)?;
            let failed: usize = results.iter().map(|r| r.failed.len()).sum();
            if results.iter().any(|r| !r.success()) {
                bail!("{} session(s) failed", failed);
            }
            Ok(())
        }
        Err(SchedulerError::StoppedOnError {
            session,
            error,
            partial,
        }) => {
            report(std::slice::from_ref(partial.as_ref()), mode)?;
            bail!("Stopped after session #{} failed: {}", session, error)
        }
        Err(e) => Err(e.into()),
    }
}

fn report(results: &[PhaseRunResult], mode: UiMode) -> Result<()> {
    if mode == UiMode::Json {
        println!("{}", serde_json::to_string(results)?);
        return Ok(());
    }
    println!();
    for result in results {
        print!("{}", render::run_summary(result));
    }
    Ok(())
}
