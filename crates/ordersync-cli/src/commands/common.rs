use chrono::{DateTime, Utc};
use ordersync_core::config::ControlConfig;
use ordersync_core::db::Database;
use ordersync_core::models::ControlState;
use ordersync_core::CycleReport;

use crate::error::CliError;

pub async fn open_database(config: &ControlConfig) -> Result<Database, CliError> {
    Ok(Database::connect(&config.database_url, config.database_auth_token.as_deref()).await?)
}

pub fn format_timestamp(seconds: Option<i64>) -> String {
    seconds
        .and_then(|value| DateTime::from_timestamp(value, 0))
        .map_or_else(
            || "never".to_string(),
            |instant| instant.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

/// Human-readable age of a unix timestamp relative to `now`
pub fn format_age(seconds: Option<i64>, now: DateTime<Utc>) -> String {
    let Some(seconds) = seconds else {
        return "never".to_string();
    };
    let age = now.timestamp().saturating_sub(seconds).max(0);
    match age {
        0..=59 => format!("{age}s ago"),
        60..=3_599 => format!("{}m ago", age / 60),
        3_600..=86_399 => format!("{}h ago", age / 3_600),
        _ => format!("{}d ago", age / 86_400),
    }
}

pub fn format_status_lines(state: &ControlState, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = vec![
        format!("Task:           {}", state.task_id),
        format!(
            "Status:         {}",
            state.status.as_deref().unwrap_or("unknown")
        ),
        format!(
            "Last heartbeat: {} ({})",
            format_timestamp(state.last_heartbeat),
            format_age(state.last_heartbeat, now)
        ),
        format!("Synced up to:   {}", format_timestamp(state.last_sync_time)),
        format!(
            "Pending:        {}",
            state.target_command.as_deref().unwrap_or("none")
        ),
    ];
    if let Some(message) = state.error_message.as_deref() {
        lines.push(format!("Message:        {message}"));
    }
    lines
}

pub fn format_cycle_lines(report: &CycleReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.windows.len() + 2);
    for window in &report.windows {
        let mut line = format!(
            "{}  pages={} fetched={} stored={} skipped={}",
            window.window, window.pages, window.fetched, window.stored, window.skipped
        );
        if window.decrypt_failures > 0 {
            line.push_str(&format!(" decrypt_failures={}", window.decrypt_failures));
        }
        if window.outcome.is_partial() {
            line.push_str("  (partial)");
        }
        lines.push(line);
    }
    lines.push(format!(
        "Total: {} windows, {} fetched, {} stored, {} skipped",
        report.windows.len(),
        report.fetched(),
        report.stored(),
        report.skipped()
    ));
    if let Some(summary) = report.partial_summary() {
        lines.push(format!("Partial: {summary}"));
    }
    if report.stopped_early {
        lines.push("Cycle ended early on STOP".to_string());
    }
    lines
}
