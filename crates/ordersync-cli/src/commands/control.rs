use chrono::Utc;
use ordersync_core::config::ControlConfig;
use ordersync_core::db::LibSqlControlChannel;
use ordersync_core::models::Command;

use crate::cli::ControlCommands;
use crate::commands::common::{format_status_lines, open_database};
use crate::error::CliError;

pub async fn run_control(config: &ControlConfig, command: &ControlCommands) -> Result<(), CliError> {
    let db = open_database(config).await?;
    let channel = LibSqlControlChannel::new(db.connection(), config.task_id.clone());

    match command {
        ControlCommands::Stop => send(&channel, Command::Stop).await,
        ControlCommands::Start => send(&channel, Command::Start).await,
        ControlCommands::Clear => {
            if channel.clear_command().await? {
                println!("Cleared pending command for task `{}`", channel.task_id());
            } else {
                println!("No pending command for task `{}`", channel.task_id());
            }
            Ok(())
        }
        ControlCommands::Status { json } => {
            let state = channel
                .snapshot()
                .await?
                .ok_or_else(|| CliError::UnknownTask(channel.task_id().to_string()))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                for line in format_status_lines(&state, Utc::now()) {
                    println!("{line}");
                }
            }
            Ok(())
        }
    }
}

async fn send(channel: &LibSqlControlChannel<'_>, command: Command) -> Result<(), CliError> {
    channel.send_command(command).await?;
    println!("Sent {command} to task `{}`", channel.task_id());
    Ok(())
}
