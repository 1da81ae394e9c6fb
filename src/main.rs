use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about = "Test-driven delivery orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every checkpoint without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create orchestration state from a plan file
    Init {
        /// Path to the JSON plan
        #[arg(long)]
        plan: PathBuf,
        /// Overwrite existing state
        #[arg(long)]
        force: bool,
    },
    /// Show phases, sessions and blockers
    Status {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Analyse session dependencies
    Graph {
        /// Only this phase
        #[arg(short, long)]
        phase: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Run one phase, or every phase in order
    Run {
        #[arg(short, long)]
        phase: Option<u32>,

        /// Maximum sessions in flight
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Stop launching sessions after the first failure
        #[arg(long)]
        stop_on_error: bool,

        /// Run sessions one at a time
        #[arg(long)]
        sequential: bool,

        /// Output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Record a decision for a session paused at a checkpoint
    Respond {
        session: u32,
        /// proceed, retry, skip, pause or modify
        action: String,
    },
    /// Record or resolve blockers
    Blocker {
        #[command(subcommand)]
        command: BlockerCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Discard all progress and start again from the plan
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum BlockerCommands {
    /// Block a session
    Add { session: u32, description: String },
    /// Resolve a blocker by id
    Resolve { id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default cadence.toml
    Init,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init { plan, force } => cmd::cmd_init(&project_dir, plan, *force)?,
        Commands::Status { json } => cmd::cmd_status(&project_dir, *json)?,
        Commands::Graph { phase, json } => cmd::cmd_graph(&project_dir, *phase, *json)?,
        Commands::Run {
            phase,
            max_concurrent,
            stop_on_error,
            sequential,
            ui,
        } => {
            let options = cmd::RunOptions {
                phase: *phase,
                max_concurrent: *max_concurrent,
                stop_on_error: *stop_on_error,
                sequential: *sequential,
                ui: ui.clone(),
            };
            cmd::cmd_run(&cli, project_dir, options).await?;
        }
        Commands::Respond { session, action } => {
            cmd::cmd_respond(&project_dir, *session, action)?
        }
        Commands::Blocker { command } => cmd::cmd_blocker(&project_dir, command)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force)?,
    }

    Ok(())
}
