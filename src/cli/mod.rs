// CLI module
// Argument parsing plus the schedule control surface

mod commands;

pub use commands::handle_schedule;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "kestrel", version, about = "Cron-scheduled agent runs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage agent schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommands {
    /// Start an agent's schedules (from its manifest, or from --cron/--prompt)
    Start {
        /// Agent name to schedule
        agent: String,
        /// Cron expression (bypasses the agent manifest)
        #[arg(long, requires = "prompt")]
        cron: Option<String>,
        /// Task prompt handed to the runner on each fire
        #[arg(long, requires = "cron")]
        prompt: Option<String>,
        /// Display label for the ad-hoc schedule
        #[arg(long, requires = "cron")]
        name: Option<String>,
    },
    /// Stop an agent's schedules
    Stop {
        /// Agent name to stop
        agent: String,
    },
    /// List all active schedules
    List,
    /// View execution logs for a scheduled agent
    Logs {
        /// Agent name
        agent: String,
        /// Show a summary of all past runs
        #[arg(long)]
        all: bool,
    },
    /// Resume all previously active schedules
    Resume,
    /// Run the scheduler daemon in the foreground (launched by `start`)
    #[command(hide = true)]
    Daemon,
}
