// Schedule state store — ~/.kestrel/scheduler/state.json
//
// One JSON document holds every agent's schedules plus the daemon's
// pid/startedAt. The whole document is rewritten on every mutation via a
// temp-file rename, so a crash mid-write never truncates the canonical
// file. Single-writer in practice (one daemon plus short-lived CLI
// commands); concurrent writers are last-write-wins, documented not locked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::scheduling::error::{Result, SchedulerError};

/// Lifecycle status of one schedule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Armed and waiting for its next fire
    Active,
    /// An execution is in flight. Must never survive a daemon restart.
    Running,
    /// Retries exhausted on the last run
    Errored,
}

/// Outcome of the most recent completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// One schedule entry for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRunState {
    /// Display label (defaults to the cron string)
    pub name: String,
    /// Cron expression
    pub cron: String,
    /// Task payload handed to the runner
    pub prompt: String,
    pub status: ScheduleStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub error_count: u32,
}

/// All schedules registered for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentScheduleState {
    pub agent_name: String,
    pub schedules: Vec<ScheduleRunState>,
    pub registered_at: DateTime<Utc>,
}

/// Root aggregate, the single unit of persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentScheduleState>,
}

/// A schedule definition as supplied by the control surface
/// (name is optional; it defaults to the cron string)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDef {
    #[serde(default)]
    pub name: Option<String>,
    pub cron: String,
    pub prompt: String,
}

/// Load the persisted state, or an empty default when no file exists.
///
/// An unparsable file is `StateCorruption`, never silently discarded.
pub fn load_state(path: &Path) -> Result<SchedulerState> {
    if !path.exists() {
        return Ok(SchedulerState::default());
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| SchedulerError::StateCorruption {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist the full state atomically: write a temp file in the same
/// directory, then rename it over the canonical path.
pub fn save_state(state: &SchedulerState, path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let tmp = dir.join(format!(".state.{}.tmp", Utc::now().timestamp_millis()));
    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;
    fs::write(&tmp, json)?;
    restrict_permissions(&tmp)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Register (or replace) an agent's schedules. Pure, no I/O.
///
/// Every entry starts active with zeroed counters; any previous schedules
/// for the agent are discarded, not merged.
pub fn add_agent(
    mut state: SchedulerState,
    agent_name: &str,
    defs: &[ScheduleDef],
) -> SchedulerState {
    let schedules = defs
        .iter()
        .map(|d| ScheduleRunState {
            name: d.name.clone().unwrap_or_else(|| d.cron.clone()),
            cron: d.cron.clone(),
            prompt: d.prompt.clone(),
            status: ScheduleStatus::Active,
            last_run_at: None,
            last_run_status: None,
            next_run_at: None,
            run_count: 0,
            error_count: 0,
        })
        .collect();

    state.agents.insert(
        agent_name.to_string(),
        AgentScheduleState {
            agent_name: agent_name.to_string(),
            schedules,
            registered_at: Utc::now(),
        },
    );
    state
}

/// Remove an agent's entry. Removing a non-existent agent is a no-op.
pub fn remove_agent(mut state: SchedulerState, agent_name: &str) -> SchedulerState {
    state.agents.remove(agent_name);
    state
}

/// Flip every `running` schedule back to `active`.
///
/// A restart implies no execution is in flight, so any `running` entry
/// found at load time is stale. Returns true when anything changed.
pub fn normalize_stale_running(state: &mut SchedulerState) -> bool {
    let mut changed = false;
    for agent in state.agents.values_mut() {
        for schedule in &mut agent.schedules {
            if schedule.status == ScheduleStatus::Running {
                schedule.status = ScheduleStatus::Active;
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn defs(entries: &[(&str, &str)]) -> Vec<ScheduleDef> {
        entries
            .iter()
            .map(|(cron, prompt)| ScheduleDef {
                name: None,
                cron: cron.to_string(),
                prompt: prompt.to_string(),
            })
            .collect()
    }

    #[test]
    fn load_returns_empty_default_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let state = load_state(&dir.path().join("state.json")).unwrap();
        assert!(state.pid.is_none());
        assert!(state.started_at.is_none());
        assert!(state.agents.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut state = SchedulerState {
            pid: Some(1234),
            ..Default::default()
        };
        state = add_agent(state, "slack-agent", &defs(&[("0 9 * * 1-5", "Post standup")]));
        save_state(&state, &path).unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded.pid, Some(1234));
        let agent = &loaded.agents["slack-agent"];
        assert_eq!(agent.agent_name, "slack-agent");
        assert_eq!(agent.schedules.len(), 1);
        assert_eq!(agent.schedules[0].cron, "0 9 * * 1-5");
        assert_eq!(agent.schedules[0].status, ScheduleStatus::Active);

        // Idempotence: saving what we loaded leaves the parsed content unchanged
        save_state(&loaded, &path).unwrap();
        let reloaded = load_state(&path).unwrap();
        assert_eq!(
            serde_json::to_value(&loaded).unwrap(),
            serde_json::to_value(&reloaded).unwrap()
        );
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        save_state(&SchedulerState::default(), &path).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["state.json"]);
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_user_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        save_state(&SchedulerState::default(), &path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_state_is_an_error_not_a_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        match load_state(&path) {
            Err(crate::scheduling::SchedulerError::StateCorruption { .. }) => {}
            other => panic!("expected StateCorruption, got {other:?}"),
        }
    }

    #[test]
    fn add_agent_replaces_previous_schedules() {
        let state = add_agent(
            SchedulerState::default(),
            "test-agent",
            &defs(&[("0 8 * * *", "old task")]),
        );
        let state = add_agent(state, "test-agent", &defs(&[("0 10 * * *", "new task")]));

        let schedules = &state.agents["test-agent"].schedules;
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].cron, "0 10 * * *");
        assert_eq!(schedules[0].run_count, 0);
    }

    #[test]
    fn schedule_name_defaults_to_cron_string() {
        let state = add_agent(
            SchedulerState::default(),
            "test-agent",
            &defs(&[("*/5 * * * *", "poll")]),
        );
        assert_eq!(state.agents["test-agent"].schedules[0].name, "*/5 * * * *");
    }

    #[test]
    fn remove_agent_handles_missing_and_last_entry() {
        let state = add_agent(SchedulerState::default(), "only", &defs(&[("0 9 * * *", "x")]));
        let state = remove_agent(state, "ghost-agent");
        assert_eq!(state.agents.len(), 1);

        let state = remove_agent(state, "only");
        assert!(state.agents.is_empty());
    }

    #[test]
    fn stale_running_entries_normalize_to_active() {
        let mut state = add_agent(
            SchedulerState::default(),
            "test-agent",
            &defs(&[("0 9 * * *", "a"), ("0 10 * * *", "b")]),
        );
        state.agents.get_mut("test-agent").unwrap().schedules[0].status =
            ScheduleStatus::Running;

        assert!(normalize_stale_running(&mut state));
        for schedule in &state.agents["test-agent"].schedules {
            assert_eq!(schedule.status, ScheduleStatus::Active);
        }
        // Second pass is a no-op
        assert!(!normalize_stale_running(&mut state));
    }
}
