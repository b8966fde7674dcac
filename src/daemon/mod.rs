// Scheduler daemon — long-lived process plus the PID-file control
// surface used to start/stop/signal it

pub mod lifecycle;
pub mod runtime;

pub use lifecycle::{DaemonLifecycle, DaemonSignal};
pub use runtime::SchedulerDaemon;
