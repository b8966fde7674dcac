// Optional user settings — ~/.kestrel/config.toml
//
// Everything has a sensible default; the file only needs to exist when
// overriding the runner command, timeout, or log retention:
//
//   [scheduler]
//   runner = "kestrel"
//   runner_args = ["run"]
//   timeout_secs = 300
//   max_log_files = 50

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::paths::config_path;
use crate::scheduling::executor::CommandRunner;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Program invoked for each scheduled run
    pub runner: String,
    /// Arguments placed before the two positional ones (agent, prompt)
    pub runner_args: Vec<String>,
    /// Upper bound on one runner invocation, in seconds
    pub timeout_secs: u64,
    /// Per-agent run log retention
    pub max_log_files: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            runner: "kestrel".to_string(),
            runner_args: vec!["run".to_string()],
            timeout_secs: 300,
            max_log_files: 50,
        }
    }
}

impl SchedulerSettings {
    pub fn build_runner(&self) -> CommandRunner {
        CommandRunner::new(
            self.runner.clone(),
            self.runner_args.clone(),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

impl Settings {
    /// Load ~/.kestrel/config.toml, or defaults when it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}
