// Scheduler daemon main loop
//
// Starting -> Running -> Terminated, with a transient reconciliation pass
// on start and on every reload signal. Signal handlers never touch timer
// state directly; they wake the select loop, which owns every armed
// timer and the execution engine.

use anyhow::{Context, Result};
use chrono::Utc;
use croner::Cron;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::paths::SchedulerPaths;
use crate::config::settings::Settings;
use crate::daemon::lifecycle::DaemonLifecycle;
use crate::scheduling::cron;
use crate::scheduling::executor::ExecutionEngine;
use crate::scheduling::state::{load_state, normalize_stale_running, save_state, ScheduleRunState};

/// Long-lived scheduler process: loads state, arms one timer per
/// schedule, reacts to reload/terminate signals, re-persists computed
/// next-run times
pub struct SchedulerDaemon {
    state_path: PathBuf,
    lifecycle: DaemonLifecycle,
    engine: Arc<ExecutionEngine>,
    /// Armed timers, one per (agent, schedule). Owned here exclusively;
    /// reconciliation drains and aborts before re-arming.
    timers: Vec<JoinHandle<()>>,
}

impl SchedulerDaemon {
    pub fn new(paths: SchedulerPaths, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            state_path: paths.state_path,
            lifecycle: DaemonLifecycle::new(paths.pid_path),
            engine,
            timers: Vec::new(),
        }
    }

    /// Construct from the environment contract set by Process Control
    pub fn from_env() -> Result<Self> {
        let paths = SchedulerPaths::from_env()?;
        let settings = Settings::load().context("Failed to load settings")?;
        let engine = Arc::new(ExecutionEngine::new(
            paths.state_path.clone(),
            paths.logs_dir.clone(),
            settings.scheduler.max_log_files,
            Arc::new(settings.scheduler.build_runner()),
        ));
        Ok(Self::new(paths, engine))
    }

    /// Run until the terminate signal arrives.
    ///
    /// State-file corruption here is fatal: the daemon must fail loudly
    /// rather than overwrite history with an empty document.
    pub async fn run(mut self) -> Result<()> {
        self.lifecycle.write_own_pid()?;

        let mut state = load_state(&self.state_path)?;
        if normalize_stale_running(&mut state) {
            warn!("normalized stale running schedules from a previous daemon");
        }
        state.pid = Some(std::process::id());
        state.started_at = Some(Utc::now());
        save_state(&state, &self.state_path)?;

        self.reconcile();

        let mut reload = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("Failed to install SIGHUP handler")?;
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;

        info!(pid = std::process::id(), "scheduler daemon running");
        loop {
            tokio::select! {
                _ = reload.recv() => {
                    info!("reload signal received");
                    self.reconcile();
                }
                _ = terminate.recv() => {
                    info!("terminate signal received");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Discard every armed timer, reload state from disk (picking up
    /// externally-applied edits), re-arm, and persist next-run times.
    ///
    /// A malformed cron expression is logged and that schedule skipped;
    /// it never aborts reconciliation for the others. An unreadable
    /// state file leaves no timers armed until the next reload.
    pub fn reconcile(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }

        let mut state = match load_state(&self.state_path) {
            Ok(state) => state,
            Err(e) => {
                error!("cannot reload scheduler state: {e}");
                return;
            }
        };

        let now = Utc::now();
        for (agent_name, agent) in &mut state.agents {
            for schedule in &mut agent.schedules {
                let parsed = match cron::parse_cron(&schedule.cron) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(
                            agent = %agent_name,
                            schedule = %schedule.name,
                            "skipping schedule with malformed cron: {e}"
                        );
                        schedule.next_run_at = None;
                        continue;
                    }
                };

                schedule.next_run_at = cron::next_occurrence(&parsed, now, &schedule.cron).ok();
                self.timers.push(tokio::spawn(timer_loop(
                    parsed,
                    agent_name.clone(),
                    schedule.clone(),
                    self.engine.clone(),
                )));
            }
        }

        if let Err(e) = save_state(&state, &self.state_path) {
            error!("failed to persist next-run times: {e}");
        }
        info!(timers = self.timers.len(), "reconciliation complete");
    }

    /// Number of currently-armed timers
    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    /// Stop timers and delete the PID file. In-flight executions are
    /// abandoned; the next startup normalizes their stale running status.
    pub fn shutdown(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        if let Err(e) = self.lifecycle.cleanup() {
            warn!("failed to remove PID file: {e}");
        }
        info!("scheduler daemon stopped");
    }
}

/// Sleep to each fire time, then hand the run to the engine on its own
/// task so one schedule's retry/backoff never delays this timer or any
/// other schedule's fire
async fn timer_loop(
    cron: Cron,
    agent_name: String,
    schedule: ScheduleRunState,
    engine: Arc<ExecutionEngine>,
) {
    loop {
        let now = Utc::now();
        let next = match cron.find_next_occurrence(&now, false) {
            Ok(next) => next,
            Err(e) => {
                warn!(agent = %agent_name, schedule = %schedule.name, "no next fire time: {e}");
                return;
            }
        };

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let engine = engine.clone();
        let agent = agent_name.clone();
        let sched = schedule.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.execute(&agent, &sched).await {
                error!(agent = %agent, schedule = %sched.name, "execution error: {e}");
            }
        });
    }
}
