// Scheduling core — state store, run logs, cron engine, execution engine
//
// The daemon process (src/daemon) arms timers from this state and drives
// the execution engine; the CLI mutates the state store and reads the run
// logs for display.

pub mod cron;
pub mod error;
pub mod executor;
pub mod run_log;
pub mod state;

pub use error::{Result, SchedulerError};
pub use executor::{CommandRunner, ExecutionEngine, TaskOutput, TaskRunner};
pub use run_log::{RunLog, MAX_LOG_FILES};
pub use state::{
    add_agent, load_state, normalize_stale_running, remove_agent, save_state, AgentScheduleState,
    RunStatus, ScheduleDef, ScheduleRunState, ScheduleStatus, SchedulerState,
};
