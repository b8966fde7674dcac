// Configuration module
// Path resolution plus optional user settings

pub mod paths;
pub mod settings;

pub use paths::SchedulerPaths;
pub use settings::{SchedulerSettings, Settings};
