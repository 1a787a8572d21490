use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ordersync")]
#[command(about = "Sync platform orders into a local database")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Load environment variables from this file instead of `./.env`
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the sync worker until stopped (default)
    Run,
    /// Run a single sync cycle and exit
    Once {
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the windows the next cycle would fetch
    Plan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Operate a running worker through its control row
    Control {
        #[command(subcommand)]
        command: ControlCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ControlCommands {
    /// Ask the worker to stop
    Stop,
    /// Ask a paused worker to resume
    Start,
    /// Clear any pending command
    Clear,
    /// Show the worker's last reported state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
