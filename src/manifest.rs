// Agent manifest — ~/.kestrel/agents/<name>/agent.toml
//
// Only the schedule block matters to the scheduler:
//
//   [[schedule]]
//   name = "Daily standup"        # optional, defaults to the cron string
//   cron = "0 9 * * 1-5"
//   prompt = "Post the standup summary"

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::config::paths::agents_dir;
use crate::scheduling::state::ScheduleDef;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    schedule: Vec<ScheduleDef>,
}

/// The scheduler-facing slice of an installed agent's manifest
#[derive(Debug, Clone)]
pub struct AgentManifest {
    pub agent_name: String,
    pub schedules: Vec<ScheduleDef>,
}

impl AgentManifest {
    /// Load the manifest of an installed agent
    pub fn load(agent_name: &str) -> Result<Self> {
        let path = agents_dir()?.join(agent_name).join("agent.toml");
        if !path.exists() {
            bail!("Agent \"{agent_name}\" is not installed");
        }
        Self::load_from(agent_name, &path)
    }

    pub fn load_from(agent_name: &str, path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest from {}", path.display()))?;
        let file: ManifestFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self {
            agent_name: agent_name.to_string(),
            schedules: file.schedule,
        })
    }
}
