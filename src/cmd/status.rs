//! Read-only views: `cadence status` and `cadence graph`.

use anyhow::{Result, bail};
use cadence::config::CadenceConfig;
use cadence::dag::GraphReport;
use cadence::ui::render;
use std::path::Path;

use super::load_state;

pub fn cmd_status(project_dir: &Path, json: bool) -> Result<()> {
    let config = CadenceConfig::new(project_dir.to_path_buf())?;
    let (_, state) = load_state(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!();
        print!("{}", render::status_report(&state));
        println!();
    }
    Ok(())
}

pub fn cmd_graph(project_dir: &Path, phase: Option<u32>, json: bool) -> Result<()> {
    let config = CadenceConfig::new(project_dir.to_path_buf())?;
    let (_, state) = load_state(&config)?;

    let phases: Vec<_> = match phase {
        Some(number) => match state.phase(number) {
            Some(p) => vec![p],
            None => bail!("Phase {} not found", number),
        },
        None => state.phases.iter().collect(),
    };

    let mut reports = Vec::new();
    for p in phases {
        reports.push(GraphReport::for_phase(&state, p)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!();
            print!("{}", render::graph_report(report));
        }
        println!();
    }

    let cyclic: Vec<u32> = reports
        .iter()
        .filter(|r| !r.is_valid())
        .map(|r| r.phase)
        .collect();
    if !cyclic.is_empty() {
        bail!("Dependency cycles found in phase(s) {:?}", cyclic);
    }
    Ok(())
}
