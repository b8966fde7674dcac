// Path resolution for the ~/.kestrel tree
//
// The daemon is launched detached and receives its three paths through
// environment variables; everything else resolves relative to the home
// directory.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment contract between Process Control and the daemon process
pub const ENV_STATE_PATH: &str = "KESTREL_SCHEDULER_STATE";
pub const ENV_PID_PATH: &str = "KESTREL_SCHEDULER_PID";
pub const ENV_LOGS_DIR: &str = "KESTREL_SCHEDULER_LOGS";

/// Root of the user's kestrel data (~/.kestrel)
pub fn kestrel_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".kestrel"))
        .context("Could not determine home directory")
}

/// Installed agent manifests live under ~/.kestrel/agents/<name>/
pub fn agents_dir() -> Result<PathBuf> {
    Ok(kestrel_home()?.join("agents"))
}

/// Optional settings file (~/.kestrel/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(kestrel_home()?.join("config.toml"))
}

/// The scheduler's three well-known paths
#[derive(Debug, Clone)]
pub struct SchedulerPaths {
    pub state_path: PathBuf,
    pub pid_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl SchedulerPaths {
    /// Defaults under ~/.kestrel/scheduler, each overridable through the
    /// environment contract (the CLI and the daemon agree this way)
    pub fn resolve() -> Result<Self> {
        let scheduler_dir = kestrel_home()?.join("scheduler");
        Ok(Self {
            state_path: env_path(ENV_STATE_PATH)
                .unwrap_or_else(|| scheduler_dir.join("state.json")),
            pid_path: env_path(ENV_PID_PATH).unwrap_or_else(|| scheduler_dir.join("daemon.pid")),
            logs_dir: env_path(ENV_LOGS_DIR).unwrap_or_else(|| scheduler_dir.join("logs")),
        })
    }

    /// Strict form for the daemon process: all three variables must be
    /// present (Process Control always sets them)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            state_path: require_env(ENV_STATE_PATH)?,
            pid_path: require_env(ENV_PID_PATH)?,
            logs_dir: require_env(ENV_LOGS_DIR)?,
        })
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).map(PathBuf::from)
}

fn require_env(var: &str) -> Result<PathBuf> {
    env_path(var).with_context(|| format!("{var} is not set (daemon launched without Process Control?)"))
}
