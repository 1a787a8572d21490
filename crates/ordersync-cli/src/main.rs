//! ordersync - order sync worker and operator CLI
//!
//! `ordersync run` keeps the local order table in step with the platform;
//! `ordersync control` steers a running worker through its control row.

mod cli;
mod commands;
mod error;
mod shutdown;


use std::path::Path;

use clap::Parser;
use ordersync_core::config::ControlConfig;
use ordersync_core::AppConfig;

use crate::cli::{Cli, Commands};
use crate::commands::control::run_control;
use crate::commands::plan::run_plan;
use crate::commands::run::{run_once, run_worker};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    load_env(cli.env_file.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "ordersync=info"
                    .parse()
                    .map_err(|error| CliError::LogFilter(format!("{error}")))?,
            ),
        )
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = AppConfig::from_env()?;
            let cancel = shutdown::install_signal_handler()?;
            run_worker(&config, &cancel).await
        }
        Commands::Once { json } => {
            let config = AppConfig::from_env()?;
            let cancel = shutdown::install_signal_handler()?;
            run_once(&config, &cancel, json).await
        }
        Commands::Plan { json } => run_plan(&AppConfig::from_env()?, json),
        Commands::Control { command } => run_control(&ControlConfig::from_env()?, &command).await,
    }
}

fn load_env(path: Option<&Path>) -> Result<(), CliError> {
    match path {
        Some(path) => dotenvy::from_path(path).map_err(|error| CliError::EnvFile {
            path: path.display().to_string(),
            message: error.to_string(),
        }),
        None => {
            dotenvy::dotenv().ok();
            Ok(())
        }
    }
}
