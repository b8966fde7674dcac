// Execution engine — runs one scheduled job to completion
//
// Enforces overlap prevention (at most one in-flight run per
// agent:schedule key), a fixed subprocess timeout, and a bounded retry
// table (10s, 30s). Every attempt writes its own RunLog; state
// transitions and log rotation happen on the terminal paths.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

use crate::scheduling::error::{Result, SchedulerError};
use crate::scheduling::run_log::{self, RunLog};
use crate::scheduling::state::{
    load_state, save_state, RunStatus, ScheduleRunState, ScheduleStatus,
};

/// Default backoff table; a run is attempted at most `len() + 1` times
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(10), Duration::from_secs(30)];

/// Captured output of a successful runner invocation
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam to the external per-agent task runner.
///
/// The production implementation shells out to the agent-run entry point;
/// tests inject a scripted runner.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, agent_name: &str, prompt: &str) -> Result<TaskOutput>;
}

/// Invokes the configured runner command with two positional arguments
/// (agent name, prompt) and captures stdout/stderr under a hard timeout
pub struct CommandRunner {
    program: String,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(program: String, leading_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            leading_args,
            timeout,
        }
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn run(&self, agent_name: &str, prompt: &str) -> Result<TaskOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg(agent_name)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SchedulerError::ExecutionFailure {
                    message: format!("failed to spawn {}: {e}", self.program),
                    stderr: String::new(),
                })
            }
            // kill_on_drop reaps the child when the output future is dropped
            Err(_) => {
                return Err(SchedulerError::ExecutionTimeout {
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(SchedulerError::ExecutionFailure {
                message: format!("runner exited with {}", output.status),
                stderr,
            });
        }

        Ok(TaskOutput { stdout, stderr })
    }
}

/// Removes the run key from the in-flight set on every exit path
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    /// None when the key is already claimed by another execution
    fn claim(set: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        let mut in_flight = set.lock().unwrap();
        if !in_flight.insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set,
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

/// Runs scheduled jobs against the state store and run log store
pub struct ExecutionEngine {
    state_path: PathBuf,
    logs_dir: PathBuf,
    max_log_files: usize,
    runner: Arc<dyn TaskRunner>,
    retry_delays: Vec<Duration>,
    /// Overlap-prevention set, keyed by `agentName:scheduleName`.
    /// In-memory only; a crash loses it by design.
    in_flight: Mutex<HashSet<String>>,
}

impl ExecutionEngine {
    pub fn new(
        state_path: PathBuf,
        logs_dir: PathBuf,
        max_log_files: usize,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            state_path,
            logs_dir,
            max_log_files,
            runner,
            retry_delays: RETRY_DELAYS.to_vec(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Override the backoff table (shorter delays in tests)
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Run one schedule to completion, including bounded retries.
    ///
    /// Errors returned here are store I/O failures; run failures are
    /// absorbed into RunLogs and schedule status.
    pub async fn execute(&self, agent_name: &str, schedule: &ScheduleRunState) -> Result<()> {
        let run_key = format!("{agent_name}:{}", schedule.name);
        let mut attempt: u32 = 0;

        loop {
            let Some(guard) = InFlightGuard::claim(&self.in_flight, &run_key) else {
                info!(key = %run_key, "run already in flight, skipping");
                run_log::append(
                    &self.make_log(agent_name, schedule, attempt, |log| {
                        log.skipped = true;
                        log.duration = 0;
                    }),
                    &self.logs_dir,
                )?;
                return Ok(());
            };

            self.update_schedule(agent_name, &schedule.name, |s| {
                s.status = ScheduleStatus::Running;
            })?;

            info!(key = %run_key, attempt, "executing schedule");
            let started = Instant::now();
            let result = self.runner.run(agent_name, &schedule.prompt).await;
            let duration = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    run_log::append(
                        &self.make_log(agent_name, schedule, attempt, |log| {
                            log.output = output.stdout.clone();
                            log.stderr = output.stderr.clone();
                            log.duration = duration;
                        }),
                        &self.logs_dir,
                    )?;
                    self.update_schedule(agent_name, &schedule.name, |s| {
                        s.status = ScheduleStatus::Active;
                        s.last_run_at = Some(Utc::now());
                        s.last_run_status = Some(RunStatus::Success);
                        s.run_count += 1;
                    })?;
                    run_log::rotate(agent_name, &self.logs_dir, self.max_log_files)?;
                    return Ok(());
                }
                Err(err) => {
                    let stderr = match &err {
                        SchedulerError::ExecutionFailure { stderr, .. } => stderr.clone(),
                        _ => String::new(),
                    };
                    warn!(key = %run_key, attempt, error = %err, "run attempt failed");
                    run_log::append(
                        &self.make_log(agent_name, schedule, attempt, |log| {
                            log.status = RunStatus::Failure;
                            log.stderr = stderr.clone();
                            log.error = Some(err.to_string());
                            log.duration = duration;
                        }),
                        &self.logs_dir,
                    )?;

                    if let Some(delay) = self.retry_delays.get(attempt as usize) {
                        // Release the claim for the backoff window; a timer
                        // fire during the sleep wins the key and this retry
                        // is recorded as skipped instead.
                        drop(guard);
                        tokio::time::sleep(*delay).await;
                        attempt += 1;
                        continue;
                    }

                    self.update_schedule(agent_name, &schedule.name, |s| {
                        s.status = ScheduleStatus::Errored;
                        s.last_run_at = Some(Utc::now());
                        s.last_run_status = Some(RunStatus::Failure);
                        s.run_count += 1;
                        s.error_count += 1;
                    })?;
                    run_log::rotate(agent_name, &self.logs_dir, self.max_log_files)?;
                    return Ok(());
                }
            }
        }
    }

    fn make_log(
        &self,
        agent_name: &str,
        schedule: &ScheduleRunState,
        attempt: u32,
        fill: impl FnOnce(&mut RunLog),
    ) -> RunLog {
        let mut log = RunLog {
            timestamp: Utc::now(),
            agent_name: agent_name.to_string(),
            schedule_name: schedule.name.clone(),
            cron: schedule.cron.clone(),
            prompt: schedule.prompt.clone(),
            output: String::new(),
            stderr: String::new(),
            status: RunStatus::Success,
            duration: 0,
            error: None,
            retry_attempt: attempt,
            skipped: false,
        };
        fill(&mut log);
        log
    }

    /// Load-mutate-save one schedule's entry. The agent may have been
    /// removed while the run was in flight; that is not an error.
    fn update_schedule(
        &self,
        agent_name: &str,
        schedule_name: &str,
        mutate: impl FnOnce(&mut ScheduleRunState),
    ) -> Result<()> {
        let mut state = load_state(&self.state_path)?;
        if let Some(agent) = state.agents.get_mut(agent_name) {
            if let Some(schedule) = agent
                .schedules
                .iter_mut()
                .find(|s| s.name == schedule_name)
            {
                mutate(schedule);
                save_state(&state, &self.state_path)?;
            }
        }
        Ok(())
    }
}
