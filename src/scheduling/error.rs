// Scheduler error taxonomy
//
// Cron-parse and execution failures are recovered locally (retry, skip, or
// status transition). Only state-file corruption at daemon startup is fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the scheduling subsystem
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// The task runner exceeded the execution timeout
    #[error("task runner timed out after {secs}s")]
    ExecutionTimeout { secs: u64 },

    /// The task runner exited non-zero or could not be spawned
    #[error("task runner failed: {message}")]
    ExecutionFailure { message: String, stderr: String },

    /// The persisted state file exists but cannot be parsed.
    /// The daemon must not overwrite history; this is fatal at startup.
    #[error("scheduler state at {path} is corrupt: {source}")]
    StateCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
