//! Configuration for cadence.
//!
//! Settings live in `.cadence/cadence.toml` and are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-project"
//!
//! [scheduler]
//! max_concurrent = 2
//! stop_on_error = false
//! sequential = false
//!
//! [sessions]
//! max_retries = 3
//!
//! [coverage]
//! server_threshold = 80.0
//! client_threshold = 70.0
//!
//! [checkpoints]
//! auto_approve = false
//!
//! [executors.backend]
//! command = "./scripts/agent.sh"
//! args = ["--domain", "backend"]
//! timeout_secs = 3600
//!
//! [executors.default]
//! command = "./scripts/agent.sh"
//! ```

use crate::executor::{CommandExecutor, ExecutorRegistry};
use crate::orchestrator::OrchestratorConfig;
use crate::scheduler::SchedulerConfig;
use crate::state::{CoverageThresholds, Domain};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CADENCE_DIR: &str = ".cadence";
pub const CONFIG_FILE: &str = "cadence.toml";

/// Executor table key used for domains without their own entry.
pub const DEFAULT_EXECUTOR: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to the plan's project or directory name)
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub stop_on_error: bool,
    #[serde(default)]
    pub sequential: bool,
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stop_on_error: false,
            sequential: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsSection {
    /// `retry_count` beyond this forces a session into ERROR
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSection {
    #[serde(default = "default_server_threshold")]
    pub server_threshold: f64,
    #[serde(default = "default_client_threshold")]
    pub client_threshold: f64,
}

fn default_server_threshold() -> f64 {
    80.0
}

fn default_client_threshold() -> f64 {
    70.0
}

impl Default for CoverageSection {
    fn default() -> Self {
        Self {
            server_threshold: default_server_threshold(),
            client_threshold: default_client_threshold(),
        }
    }
}

impl CoverageSection {
    pub fn thresholds(&self) -> CoverageThresholds {
        CoverageThresholds {
            server: self.server_threshold,
            client: self.client_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointsSection {
    #[serde(default)]
    pub auto_approve: bool,
}

/// How to launch the executor for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorCommandConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Contents of `cadence.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CadenceToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub sessions: SessionsSection,
    #[serde(default)]
    pub coverage: CoverageSection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    /// Keyed by domain name or `default`
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorCommandConfig>,
}

impl CadenceToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cadence.toml")
    }

    /// Load `cadence.toml` from the given directory, or defaults if absent.
    pub fn load_or_default(cadence_dir: &Path) -> Result<Self> {
        let config_path = cadence_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize cadence.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("CADENCE_MAX_CONCURRENT") {
            match value.trim().parse::<usize>() {
                Ok(n) => self.scheduler.max_concurrent = n,
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid CADENCE_MAX_CONCURRENT"),
            }
        }
        if let Some(value) = lookup("CADENCE_AUTO_APPROVE") {
            self.checkpoints.auto_approve =
                matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Human-readable warnings about suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scheduler.max_concurrent == 0 {
            warnings.push(
                "scheduler.max_concurrent is 0; sessions will run one at a time".to_string(),
            );
        }
        for (key, value) in [
            ("coverage.server_threshold", self.coverage.server_threshold),
            ("coverage.client_threshold", self.coverage.client_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                warnings.push(format!("{} = {} is outside 0-100", key, value));
            }
        }
        if self.coverage.server_threshold < self.coverage.client_threshold {
            warnings.push(format!(
                "coverage.server_threshold ({}) is below coverage.client_threshold ({})",
                self.coverage.server_threshold, self.coverage.client_threshold
            ));
        }
        for (key, exec) in &self.executors {
            if key != DEFAULT_EXECUTOR && key.parse::<Domain>().is_err() {
                warnings.push(format!(
                    "Unknown executor '{}'. Expected a domain (backend, frontend, mobile, e2e) or 'default'",
                    key
                ));
            }
            if exec.command.trim().is_empty() {
                warnings.push(format!("executors.{}.command is empty", key));
            }
        }

        warnings
    }
}

/// Runtime configuration: the parsed file plus CLI overrides.
#[derive(Debug, Clone)]
pub struct CadenceConfig {
    pub project_dir: PathBuf,
    pub cadence_dir: PathBuf,
    pub toml: CadenceToml,
    pub verbose: bool,
    /// CLI: approve every checkpoint
    pub yes: bool,
    pub cli_max_concurrent: Option<usize>,
    pub cli_stop_on_error: bool,
    pub cli_sequential: bool,
}

impl CadenceConfig {
    /// Load configuration for a project directory (file, then environment).
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let cadence_dir = project_dir.join(CADENCE_DIR);
        let mut toml = CadenceToml::load_or_default(&cadence_dir)?;
        toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            cadence_dir,
            toml,
            verbose: false,
            yes: false,
            cli_max_concurrent: None,
            cli_stop_on_error: false,
            cli_sequential: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.cadence_dir.join(CONFIG_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.cadence_dir.join("state")
    }

    /// Where `init` copies the plan it was given.
    pub fn plan_file(&self) -> PathBuf {
        self.cadence_dir.join("plan.json")
    }

    /// Configured project name, falling back to the directory name.
    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("project")
                .to_string()
        })
    }

    /// CLI → environment → file.
    pub fn max_concurrent(&self) -> usize {
        self.cli_max_concurrent
            .unwrap_or(self.toml.scheduler.max_concurrent)
    }

    pub fn auto_approve(&self) -> bool {
        self.yes || self.toml.checkpoints.auto_approve
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_concurrent(self.max_concurrent())
            .with_stop_on_error(self.cli_stop_on_error || self.toml.scheduler.stop_on_error)
            .with_sequential(self.cli_sequential || self.toml.scheduler.sequential)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_retries: self.toml.sessions.max_retries,
            coverage: self.toml.coverage.thresholds(),
        }
    }

    /// Build the executor registry from the `[executors.*]` tables.
    pub fn executor_registry(&self) -> Result<ExecutorRegistry> {
        let mut registry = ExecutorRegistry::new();
        for (key, exec) in &self.toml.executors {
            let executor = Arc::new(CommandExecutor::new(exec.clone(), self.project_dir.clone()));
            if key == DEFAULT_EXECUTOR {
                registry = registry.with_fallback(executor);
            } else {
                let domain: Domain = key
                    .parse()
                    .with_context(|| format!("Invalid executor table [executors.{}]", key))?;
                registry = registry.register(domain, executor);
            }
        }
        Ok(registry)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
