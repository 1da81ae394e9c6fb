//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                 |
//! |-----------|----------------------------------|
//! | `project` | `Init`, `Reset`                  |
//! | `status`  | `Status`, `Graph`                |
//! | `run`     | `Run`                            |
//! | `respond` | `Respond`, `Blocker`             |
//! | `config`  | `Config`                         |

pub mod config;
pub mod project;
pub mod respond;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use project::{cmd_init, cmd_reset};
pub use respond::{cmd_blocker, cmd_respond};
pub use run::{RunOptions, cmd_run};
pub use status::{cmd_graph, cmd_status};

use anyhow::{Context, Result, bail};
use cadence::config::CadenceConfig;
use cadence::plan::PlanFile;
use cadence::state::{AgentState, StateStore};

/// Name of the project whose plan `init` recorded.
pub(crate) fn project_name(config: &CadenceConfig) -> Result<String> {
    let plan_file = config.plan_file();
    if !plan_file.exists() {
        bail!("No plan found. Run 'cadence init --plan <file>' first.");
    }
    Ok(PlanFile::load(&plan_file)?.project)
}

/// Load the persisted state for the project.
pub(crate) fn load_state(config: &CadenceConfig) -> Result<(StateStore, AgentState)> {
    let project = project_name(config)?;
    let store = StateStore::new(config.state_dir());
    let state = store.load(&project)?.with_context(|| {
        format!(
            "No state for project '{}'. Run 'cadence init --plan <file>' first.",
            project
        )
    })?;
    Ok((store, state))
}
