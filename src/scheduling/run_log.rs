// Run log store — one JSON document per execution attempt under
// <logsDir>/<agentName>/<timestamp>.json
//
// Records are write-once and never edited; retention is enforced by
// rotate(), which callers invoke after the writes that could push an
// agent over the limit (it is not automatic inside append, so several
// writes can be batched before paying the directory scan).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduling::error::Result;
use crate::scheduling::state::RunStatus;

/// Default per-agent retention
pub const MAX_LOG_FILES: usize = 50;

/// Immutable record of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub schedule_name: String,
    pub cron: String,
    pub prompt: String,
    pub output: String,
    pub stderr: String,
    pub status: RunStatus,
    /// Wall-clock milliseconds around the runner call for this attempt
    pub duration: u64,
    pub error: Option<String>,
    /// 0-based; each retry writes its own record
    pub retry_attempt: u32,
    /// True when overlap prevention rejected the run
    pub skipped: bool,
}

fn agent_log_dir(agent_name: &str, logs_dir: &Path) -> PathBuf {
    logs_dir.join(agent_name)
}

/// RFC3339 timestamps sort lexicographically in chronological order;
/// colons are not portable in filenames, so they become dashes. Nanosecond
/// precision keeps rapid retry attempts from colliding on one filename.
fn timestamp_filename(timestamp: &DateTime<Utc>) -> String {
    let ts = timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    format!("{}.json", ts.replace(':', "-"))
}

/// Write one record, creating the agent's log directory if absent
pub fn append(log: &RunLog, logs_dir: &Path) -> Result<()> {
    let dir = agent_log_dir(&log.agent_name, logs_dir);
    fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(log).map_err(std::io::Error::other)?;
    fs::write(dir.join(timestamp_filename(&log.timestamp)), json)?;
    Ok(())
}

fn sorted_log_files(agent_name: &str, logs_dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = agent_log_dir(agent_name, logs_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Most recent record for the agent, or None when nothing was recorded
pub fn latest(agent_name: &str, logs_dir: &Path) -> Result<Option<RunLog>> {
    let files = sorted_log_files(agent_name, logs_dir)?;
    match files.last() {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let log = serde_json::from_str(&raw).map_err(std::io::Error::other)?;
            Ok(Some(log))
        }
        None => Ok(None),
    }
}

/// Every record for the agent, newest first
pub fn all(agent_name: &str, logs_dir: &Path) -> Result<Vec<RunLog>> {
    let files = sorted_log_files(agent_name, logs_dir)?;
    let mut logs = Vec::with_capacity(files.len());
    for path in files.iter().rev() {
        let raw = fs::read_to_string(path)?;
        logs.push(serde_json::from_str(&raw).map_err(std::io::Error::other)?);
    }
    Ok(logs)
}

/// Delete the oldest records once the agent exceeds `max_files`,
/// keeping exactly `max_files` afterward
pub fn rotate(agent_name: &str, logs_dir: &Path, max_files: usize) -> Result<()> {
    let files = sorted_log_files(agent_name, logs_dir)?;
    if files.len() <= max_files {
        return Ok(());
    }
    for path in &files[..files.len() - max_files] {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample(agent: &str, minute: u32, output: &str) -> RunLog {
        RunLog {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 7, 9, minute, 0).unwrap(),
            agent_name: agent.to_string(),
            schedule_name: "Daily".to_string(),
            cron: "0 9 * * *".to_string(),
            prompt: "Do it".to_string(),
            output: output.to_string(),
            stderr: String::new(),
            status: RunStatus::Success,
            duration: 100,
            error: None,
            retry_attempt: 0,
            skipped: false,
        }
    }

    #[test]
    fn append_creates_agent_directory() {
        let dir = TempDir::new().unwrap();
        append(&sample("new-agent", 0, "ok"), dir.path()).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("new-agent"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(".json"));
        assert!(!files[0].contains(':'));
    }

    #[test]
    fn latest_returns_newest_record() {
        let dir = TempDir::new().unwrap();
        append(&sample("test-agent", 1, "first"), dir.path()).unwrap();
        append(&sample("test-agent", 3, "third"), dir.path()).unwrap();
        append(&sample("test-agent", 2, "second"), dir.path()).unwrap();

        let log = latest("test-agent", dir.path()).unwrap().unwrap();
        assert_eq!(log.output, "third");
    }

    #[test]
    fn latest_is_none_without_logs() {
        let dir = TempDir::new().unwrap();
        assert!(latest("nonexistent-agent", dir.path()).unwrap().is_none());
    }

    #[test]
    fn all_returns_newest_first() {
        let dir = TempDir::new().unwrap();
        append(&sample("test-agent", 1, "a"), dir.path()).unwrap();
        append(&sample("test-agent", 3, "c"), dir.path()).unwrap();
        append(&sample("test-agent", 2, "b"), dir.path()).unwrap();

        let outputs: Vec<_> = all("test-agent", dir.path())
            .unwrap()
            .into_iter()
            .map(|l| l.output)
            .collect();
        assert_eq!(outputs, vec!["c", "b", "a"]);
    }

    #[test]
    fn rotate_keeps_the_most_recent_max_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..55 {
            append(&sample("test-agent", i, &format!("run-{i}")), dir.path()).unwrap();
        }
        assert_eq!(all("test-agent", dir.path()).unwrap().len(), 55);

        rotate("test-agent", dir.path(), MAX_LOG_FILES).unwrap();

        let remaining = all("test-agent", dir.path()).unwrap();
        assert_eq!(remaining.len(), 50);
        // Newest first: minutes 54 down to 5 survive
        assert_eq!(remaining[0].output, "run-54");
        assert_eq!(remaining[49].output, "run-5");
    }

    #[test]
    fn rotate_under_limit_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        append(&sample("test-agent", 0, "ok"), dir.path()).unwrap();
        rotate("test-agent", dir.path(), MAX_LOG_FILES).unwrap();
        assert_eq!(all("test-agent", dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn rotate_on_missing_directory_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        rotate("ghost", dir.path(), MAX_LOG_FILES).unwrap();
    }
}
