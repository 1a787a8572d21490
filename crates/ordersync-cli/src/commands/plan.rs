use ordersync_core::planner::{TimeRange, TimeWindowPlanner};
use ordersync_core::{AppConfig, SyncWindow};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub range: TimeRange,
    pub windows: Vec<SyncWindow>,
}

pub fn build_plan(config: &AppConfig) -> Result<PlanOutput, CliError> {
    let planner = TimeWindowPlanner::new(config.time_range, config.utc_offset);
    let (range, windows) = planner.plan()?;
    Ok(PlanOutput { range, windows })
}

pub fn run_plan(config: &AppConfig, as_json: bool) -> Result<(), CliError> {
    let plan = build_plan(config)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    if plan.windows.is_empty() {
        println!("Nothing to sync: the configured range is empty.");
        return Ok(());
    }

    println!(
        "Range {} .. {} (UTC offset {})",
        plan.range.start.format("%Y-%m-%d %H:%M:%S"),
        plan.range.end.format("%Y-%m-%d %H:%M:%S"),
        config.utc_offset
    );
    for (index, window) in plan.windows.iter().enumerate() {
        println!("{:>3}. {window}", index + 1);
    }
    Ok(())
}
