//! Project setup commands: `cadence init` and `cadence reset`.

use anyhow::{Context, Result, bail};
use cadence::config::{CadenceConfig, CadenceToml};
use cadence::plan::PlanFile;
use cadence::state::StateStore;
use console::style;
use std::path::Path;
use tracing::info;

pub fn cmd_init(project_dir: &Path, plan_path: &Path, force: bool) -> Result<()> {
    let config = CadenceConfig::new(project_dir.to_path_buf())?;
    let plan = PlanFile::load(plan_path)?;
    let store = StateStore::new(config.state_dir());

    if store.exists(&plan.project) && !force {
        bail!(
            "State for project '{}' already exists. Use --force to overwrite it.",
            plan.project
        );
    }
    for (session, dependency) in plan.forward_dependencies() {
        println!(
            "{} session #{} depends on #{} from a later phase",
            style("warning:").yellow().bold(),
            session,
            dependency
        );
    }

    std::fs::create_dir_all(&config.cadence_dir).with_context(|| {
        format!("Failed to create {}", config.cadence_dir.display())
    })?;
    let project = plan.project.clone();
    let session_count = plan.session_count();
    let phase_count = plan.phases.len();
    let mut state = plan.clone().into_state()?;
    plan.save(&config.plan_file())?;
    store.save(&mut state)?;
    info!(project = %project, sessions = session_count, "Initialized state");

    let config_file = config.config_file();
    let created_config = if config_file.exists() {
        false
    } else {
        let mut toml = CadenceToml::default();
        toml.project.name = Some(project.clone());
        toml.save(&config_file)?;
        true
    };

    println!(
        "Initialized {} with {} phases and {} sessions",
        style(&project).bold(),
        phase_count,
        session_count
    );
    println!();
    println!("  .cadence/");
    println!("  ├── plan.json      # Copy of the plan");
    if created_config {
        println!("  ├── cadence.toml   # Configuration (add [executors.*] tables)");
    }
    println!("  └── state/         # Orchestration state");
    println!();
    println!("Next steps:");
    println!("  1. Configure an executor in .cadence/cadence.toml");
    println!("  2. Run `cadence graph` to check dependencies");
    println!("  3. Run `cadence run` to start");
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let config = CadenceConfig::new(project_dir.to_path_buf())?;
    let plan_file = config.plan_file();
    if !plan_file.exists() {
        bail!("No plan found. Run 'cadence init --plan <file>' first.");
    }

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will reset all progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let plan = PlanFile::load(&plan_file)?;
    let store = StateStore::new(config.state_dir());
    store.delete(&plan.project)?;
    let mut state = plan.into_state()?;
    store.save(&mut state)?;

    println!("Reset complete");
    Ok(())
}
