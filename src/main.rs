// Kestrel - cron-scheduled agent runs
// Main entry point

use anyhow::Result;
use clap::Parser;

use kestrel::cli::{handle_schedule, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Schedule { command } => handle_schedule(command).await,
    }
}
