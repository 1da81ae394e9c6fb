//! Out-of-band state changes: `cadence respond` and `cadence blocker`.
//!
//! These edit the persisted state directly and are meant for a project that
//! is not currently running.

use anyhow::Result;
use cadence::checkpoint::{CheckpointAction, record_decision};
use cadence::config::CadenceConfig;
use cadence::state::StatusKind;
use chrono::Utc;
use console::style;
use std::path::Path;

use super::super::BlockerCommands;
use super::load_state;

pub fn cmd_respond(project_dir: &Path, session: u32, action: &str) -> Result<()> {
    let action: CheckpointAction = action.parse()?;
    let config = CadenceConfig::new(project_dir.to_path_buf())?;
    let (store, mut state) = load_state(&config)?;

    let status = record_decision(&mut state, session, action)?;
    state.refresh_status();
    store.save(&mut state)?;

    if status == StatusKind::Skipped {
        println!("Session #{} {}", session, style("skipped").dim());
    } else {
        println!(
            "Recorded '{}' for session #{}; it will be applied on the next `cadence run`",
            style(action).cyan(),
            session
        );
    }
    Ok(())
}

pub fn cmd_blocker(project_dir: &Path, command: &BlockerCommands) -> Result<()> {
    let config = CadenceConfig::new(project_dir.to_path_buf())?;
    let (store, mut state) = load_state(&config)?;

    match command {
        BlockerCommands::Add {
            session,
            description,
        } => {
            let id = state.add_blocker(*session, description, Utc::now())?;
            state.refresh_status();
            store.save(&mut state)?;
            println!("Blocked session #{} ({})", session, style(&id).dim());
            println!("Resolve with `cadence blocker resolve {}`", id);
        }
        BlockerCommands::Resolve { id } => {
            state.resolve_blocker(id, Utc::now())?;
            state.refresh_status();
            store.save(&mut state)?;
            println!("Resolved blocker {}", style(id).dim());
        }
    }
    Ok(())
}
