// Schedule command handling — the control surface over the scheduler
//
// These commands run as short-lived processes: they mutate the persisted
// state, then start the daemon or signal it to reconcile. They never talk
// to the daemon directly.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};

use crate::cli::ScheduleCommands;
use crate::config::paths::SchedulerPaths;
use crate::daemon::{DaemonLifecycle, DaemonSignal, SchedulerDaemon};
use crate::manifest::AgentManifest;
use crate::scheduling::cron::{next_fire_after, parse_cron};
use crate::scheduling::run_log;
use crate::scheduling::state::{
    add_agent, load_state, remove_agent, save_state, RunStatus, ScheduleDef, ScheduleStatus,
};

pub async fn handle_schedule(command: ScheduleCommands) -> Result<()> {
    match command {
        ScheduleCommands::Start {
            agent,
            cron,
            prompt,
            name,
        } => start(&agent, cron, prompt, name),
        ScheduleCommands::Stop { agent } => stop(&agent),
        ScheduleCommands::List => list(),
        ScheduleCommands::Logs { agent, all } => logs(&agent, all),
        ScheduleCommands::Resume => resume(),
        ScheduleCommands::Daemon => SchedulerDaemon::from_env()?.run().await,
    }
}

fn start(
    agent_name: &str,
    cron: Option<String>,
    prompt: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let defs = match (cron, prompt) {
        (Some(cron), Some(prompt)) => vec![ScheduleDef { name, cron, prompt }],
        _ => {
            let manifest = AgentManifest::load(agent_name)?;
            if manifest.schedules.is_empty() {
                bail!("{agent_name} has no schedule block in agent.toml");
            }
            manifest.schedules
        }
    };

    // Reject invalid cron strings before anything is persisted
    for def in &defs {
        parse_cron(&def.cron)?;
    }

    let paths = SchedulerPaths::resolve()?;
    let mut state = load_state(&paths.state_path)?;
    state = add_agent(state, agent_name, &defs);

    let now = Utc::now();
    if let Some(agent) = state.agents.get_mut(agent_name) {
        for schedule in &mut agent.schedules {
            schedule.next_run_at = next_fire_after(&schedule.cron, now).ok();
        }
    }
    save_state(&state, &paths.state_path)?;

    start_or_reload(&paths)?;

    println!("Schedule started for {agent_name}");
    if let Some(agent) = state.agents.get(agent_name) {
        for schedule in &agent.schedules {
            println!(
                "  {}  {}  (next: {})",
                schedule.name,
                schedule.cron,
                format_time(schedule.next_run_at)
            );
        }
    }
    Ok(())
}

fn stop(agent_name: &str) -> Result<()> {
    let paths = SchedulerPaths::resolve()?;
    let mut state = load_state(&paths.state_path)?;

    if !state.agents.contains_key(agent_name) {
        bail!("{agent_name} has no active schedule\nRun: kestrel schedule list");
    }

    state = remove_agent(state, agent_name);
    save_state(&state, &paths.state_path)?;

    let lifecycle = DaemonLifecycle::new(paths.pid_path.clone());
    if state.agents.is_empty() {
        lifecycle.stop();
        println!("Schedule stopped for {agent_name}");
        println!("Scheduler daemon shut down (no active schedules)");
    } else {
        lifecycle.signal(DaemonSignal::Reload);
        println!("Schedule stopped for {agent_name}");
    }
    Ok(())
}

fn list() -> Result<()> {
    let paths = SchedulerPaths::resolve()?;
    let state = load_state(&paths.state_path)?;

    if state.agents.is_empty() {
        println!("No active schedules.");
        println!("Start one with: kestrel schedule start <agent-name>");
        return Ok(());
    }

    println!(
        "{:<20}{:<18}{:<10}{:<22}{}",
        "Agent", "Schedule", "Status", "Last Run", "Next Run"
    );
    for agent in state.agents.values() {
        for schedule in &agent.schedules {
            println!(
                "{:<20}{:<18}{:<10}{:<22}{}",
                agent.agent_name,
                schedule.cron,
                status_label(schedule.status),
                format_time(schedule.last_run_at),
                format_time(schedule.next_run_at)
            );
        }
    }
    Ok(())
}

fn logs(agent_name: &str, all: bool) -> Result<()> {
    let paths = SchedulerPaths::resolve()?;

    if all {
        let logs = run_log::all(agent_name, &paths.logs_dir)?;
        if logs.is_empty() {
            println!("No runs recorded for {agent_name}.");
            return Ok(());
        }

        println!(
            "{:<22}{:<18}{:<10}{}",
            "Time", "Schedule", "Status", "Duration"
        );
        for log in logs {
            println!(
                "{:<22}{:<18}{:<10}{:.1}s",
                format_time(Some(log.timestamp)),
                log.schedule_name,
                run_status_label(log.status),
                log.duration as f64 / 1000.0
            );
        }
        return Ok(());
    }

    let Some(log) = run_log::latest(agent_name, &paths.logs_dir)? else {
        println!("No runs recorded for {agent_name}.");
        return Ok(());
    };

    println!(
        "Last run: {} ({})",
        format_time(Some(log.timestamp)),
        log.schedule_name
    );
    println!("Status:   {}", run_status_label(log.status));
    println!("Duration: {:.1}s", log.duration as f64 / 1000.0);
    println!("Prompt:   {}", log.prompt);
    println!();
    if !log.output.is_empty() {
        println!("Output:");
        println!("  {}", log.output.trim_end().replace('\n', "\n  "));
    }
    if let Some(error) = &log.error {
        println!();
        println!("Error: {error}");
    }
    if !log.stderr.is_empty() {
        println!("Stderr: {}", log.stderr.trim_end());
    }
    Ok(())
}

fn resume() -> Result<()> {
    let paths = SchedulerPaths::resolve()?;
    let mut state = load_state(&paths.state_path)?;

    if state.agents.is_empty() {
        println!("No schedules to resume.");
        println!("Start one with: kestrel schedule start <agent-name>");
        return Ok(());
    }

    let now = Utc::now();
    for agent in state.agents.values_mut() {
        for schedule in &mut agent.schedules {
            schedule.next_run_at = next_fire_after(&schedule.cron, now).ok();
            if schedule.status == ScheduleStatus::Errored {
                schedule.status = ScheduleStatus::Active;
            }
        }
    }
    save_state(&state, &paths.state_path)?;

    if start_or_reload(&paths)? {
        println!("Scheduler daemon reloaded.");
    } else {
        println!("Scheduler daemon started.");
    }

    println!("Resumed {} agent(s):", state.agents.len());
    for agent in state.agents.values() {
        println!(
            "  {} ({} schedule(s))",
            agent.agent_name,
            agent.schedules.len()
        );
    }
    Ok(())
}

/// Signal a running daemon to reconcile, or launch one. Returns whether a
/// daemon was already running.
fn start_or_reload(paths: &SchedulerPaths) -> Result<bool> {
    let lifecycle = DaemonLifecycle::new(paths.pid_path.clone());
    if lifecycle.is_running() {
        lifecycle.signal(DaemonSignal::Reload);
        Ok(true)
    } else {
        lifecycle
            .start(&paths.state_path, &paths.logs_dir)
            .context("Failed to start scheduler daemon")?;
        Ok(false)
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

fn status_label(status: ScheduleStatus) -> &'static str {
    match status {
        ScheduleStatus::Active => "active",
        ScheduleStatus::Running => "running",
        ScheduleStatus::Errored => "errored",
    }
}

fn run_status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "success",
        RunStatus::Failure => "failure",
    }
}
