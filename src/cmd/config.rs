//! Configuration view and validation commands: `cadence config`.

use anyhow::Result;
use cadence::config::{CADENCE_DIR, CONFIG_FILE, CadenceConfig, CadenceToml};

use super::super::ConfigCommands;

fn print_toml(toml: &CadenceToml) {
    match toml::to_string_pretty(toml) {
        Ok(text) => {
            for line in text.lines() {
                println!("  {}", line);
            }
        }
        Err(e) => println!("  (could not render configuration: {})", e),
    }
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let cadence_dir = project_dir.join(CADENCE_DIR);
    let config_path = cadence_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Cadence Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No cadence.toml found at {}", config_path.display());
                println!("Run 'cadence config init' to create one.");
            }
            println!();

            // Effective values include environment overrides.
            let config = CadenceConfig::new(project_dir.to_path_buf())?;
            println!("Effective values (with env overrides):");
            print_toml(&config.toml);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No cadence.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = CadenceToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("cadence.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !cadence_dir.exists() {
                std::fs::create_dir_all(&cadence_dir)?;
            }

            CadenceToml::default().save(&config_path)?;

            println!("Created cadence.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [scheduler] max_concurrent, stop_on_error, sequential");
            println!("  - [coverage] server_threshold, client_threshold");
            println!("  - [executors.<domain>] command, args, timeout_secs");
            println!();
        }
    }

    Ok(())
}
