// Daemon process control
//
// PID file lifecycle used by the short-lived CLI to start/stop/signal the
// long-lived scheduler daemon and to detect staleness. The daemon itself
// is this same binary re-entered through the hidden `schedule daemon`
// subcommand, launched detached so it outlives the launching command.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{info, warn};

use crate::config::paths::{ENV_LOGS_DIR, ENV_PID_PATH, ENV_STATE_PATH};

/// Signals the control surface can deliver to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Re-read state and re-arm all timers (SIGHUP)
    Reload,
    /// Stop timers, remove the PID file, exit 0 (SIGTERM)
    Terminate,
}

/// Manages the daemon's PID file and process lifecycle
pub struct DaemonLifecycle {
    pid_path: PathBuf,
}

impl DaemonLifecycle {
    pub fn new(pid_path: PathBuf) -> Self {
        Self { pid_path }
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Write the calling process's own PID (used by the daemon at startup)
    pub fn write_own_pid(&self) -> Result<()> {
        self.write_pid(std::process::id())
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&self.pid_path, pid.to_string())
            .with_context(|| format!("Failed to write PID file: {}", self.pid_path.display()))?;
        restrict_permissions(&self.pid_path)?;
        info!(pid = pid, path = %self.pid_path.display(), "PID file written");
        Ok(())
    }

    /// Recorded PID, or None when the file is absent or unparsable
    pub fn pid(&self) -> Option<u32> {
        let raw = fs::read_to_string(&self.pid_path).ok()?;
        raw.trim().parse().ok()
    }

    /// Whether the recorded daemon process is alive.
    ///
    /// A PID file pointing at a dead process is stale; it is deleted as a
    /// side effect and false is returned.
    pub fn is_running(&self) -> bool {
        if !self.pid_path.exists() {
            return false;
        }
        match self.pid() {
            Some(pid) if process_exists(pid) => true,
            _ => {
                warn!(path = %self.pid_path.display(), "removing stale PID file");
                let _ = fs::remove_file(&self.pid_path);
                false
            }
        }
    }

    /// Remove the PID file (daemon shutdown path)
    pub fn cleanup(&self) -> Result<()> {
        if self.pid_path.exists() {
            fs::remove_file(&self.pid_path).with_context(|| {
                format!("Failed to remove PID file: {}", self.pid_path.display())
            })?;
        }
        Ok(())
    }

    /// Launch the daemon detached from the controlling terminal, passing
    /// the state/log paths through the environment contract.
    ///
    /// No-op returning the existing PID when a daemon is already running.
    pub fn start(&self, state_path: &Path, logs_dir: &Path) -> Result<u32> {
        if self.is_running() {
            if let Some(pid) = self.pid() {
                return Ok(pid);
            }
        }

        let exe = std::env::current_exe().context("Failed to resolve current executable")?;
        let log_path = self
            .pid_path
            .parent()
            .map(|d| d.join("daemon.log"))
            .unwrap_or_else(|| PathBuf::from("daemon.log"));
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let daemon_log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open daemon log: {}", log_path.display()))?;

        let mut cmd = std::process::Command::new(exe);
        cmd.args(["schedule", "daemon"])
            .env(ENV_STATE_PATH, state_path)
            .env(ENV_PID_PATH, &self.pid_path)
            .env(ENV_LOGS_DIR, logs_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(daemon_log.try_clone()?))
            .stderr(Stdio::from(daemon_log));

        // Own process group so the daemon survives the launching terminal
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().context("Failed to spawn scheduler daemon")?;
        let pid = child.id();
        self.write_pid(pid)?;
        info!(pid = pid, "scheduler daemon started");
        Ok(pid)
    }

    /// Send the terminate signal to the recorded PID.
    ///
    /// The PID file is removed afterward regardless of whether delivery
    /// succeeded (the process may already have exited). Returns whether
    /// the signal was delivered.
    pub fn stop(&self) -> bool {
        let Some(pid) = self.pid() else {
            return false;
        };
        let delivered = send_signal(pid, DaemonSignal::Terminate);
        if self.pid_path.exists() {
            let _ = fs::remove_file(&self.pid_path);
        }
        if delivered {
            info!(pid = pid, "scheduler daemon stopped");
        }
        delivered
    }

    /// Deliver a reload or terminate signal; false when no PID file
    /// exists or delivery fails
    pub fn signal(&self, kind: DaemonSignal) -> bool {
        match self.pid() {
            Some(pid) => send_signal(pid, kind),
            None => false,
        }
    }
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

/// Existence probe without side effects: kill with the null signal
#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(unix)]
fn send_signal(pid: u32, kind: DaemonSignal) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = match kind {
        DaemonSignal::Reload => Signal::SIGHUP,
        DaemonSignal::Terminate => Signal::SIGTERM,
    };
    kill(Pid::from_raw(pid as i32), signal).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lifecycle_in_tempdir() -> (DaemonLifecycle, TempDir) {
        let dir = TempDir::new().unwrap();
        let lifecycle = DaemonLifecycle::new(dir.path().join("daemon.pid"));
        (lifecycle, dir)
    }

    #[test]
    fn pid_file_lifecycle() {
        let (lifecycle, _dir) = lifecycle_in_tempdir();

        lifecycle.write_own_pid().unwrap();
        assert!(lifecycle.pid_path().exists());
        assert_eq!(lifecycle.pid(), Some(std::process::id()));
        assert!(lifecycle.is_running());

        lifecycle.cleanup().unwrap();
        assert!(!lifecycle.pid_path().exists());
        assert!(!lifecycle.is_running());
    }

    #[test]
    fn missing_pid_file_reads_as_not_running() {
        let (lifecycle, _dir) = lifecycle_in_tempdir();
        assert!(!lifecycle.is_running());
        assert_eq!(lifecycle.pid(), None);
    }

    #[test]
    fn stale_pid_file_is_deleted_on_probe() {
        let (lifecycle, _dir) = lifecycle_in_tempdir();
        // A PID that almost certainly does not exist
        fs::write(lifecycle.pid_path(), "999999999").unwrap();

        assert!(!lifecycle.is_running());
        assert!(!lifecycle.pid_path().exists());
    }

    #[test]
    fn unparsable_pid_file_reads_as_none() {
        let (lifecycle, _dir) = lifecycle_in_tempdir();
        fs::write(lifecycle.pid_path(), "not-a-pid").unwrap();
        assert_eq!(lifecycle.pid(), None);
        assert!(!lifecycle.is_running());
    }

    #[test]
    fn signal_without_pid_file_returns_false() {
        let (lifecycle, _dir) = lifecycle_in_tempdir();
        assert!(!lifecycle.signal(DaemonSignal::Reload));
        assert!(!lifecycle.stop());
    }

    #[test]
    fn stop_removes_pid_file_even_when_process_is_gone() {
        let (lifecycle, _dir) = lifecycle_in_tempdir();
        fs::write(lifecycle.pid_path(), "999999999").unwrap();

        assert!(!lifecycle.stop());
        assert!(!lifecycle.pid_path().exists());
    }

    #[test]
    fn process_exists_for_current_process() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(999999999));
    }
}
