use ordersync_core::config::ControlConfig;
use ordersync_core::crypto::FieldDecryptor;
use ordersync_core::db::{LibSqlControlChannel, LibSqlOrderRepository};
use ordersync_core::upstream::{PlatformClient, TokenManager};
use ordersync_core::{AppConfig, ExitReason, SchedulerConfig, SyncScheduler};
use tokio_util::sync::CancellationToken;

use crate::commands::common::{format_cycle_lines, open_database};
use crate::error::CliError;

pub async fn run_worker(config: &AppConfig, cancel: &CancellationToken) -> Result<(), CliError> {
    let db = open_database(&ControlConfig::from(config)).await?;
    let client = PlatformClient::from_config(config)?;
    let tokens = TokenManager::new(client.clone());
    let decryptor = FieldDecryptor::new(&config.app_secret)?;
    let store = LibSqlOrderRepository::with_policy(db.connection(), config.merge_policy.clone());
    let control = LibSqlControlChannel::new(db.connection(), config.task_id.clone());

    tracing::info!(
        task_id = %config.task_id,
        remote = db.is_remote(),
        api = client.base_url(),
        "starting ordersync worker"
    );

    let mut scheduler = SyncScheduler::new(
        SchedulerConfig::from_app_config(config),
        &client,
        &tokens,
        &store,
        &control,
        &decryptor,
    );
    match scheduler.run(cancel).await? {
        ExitReason::Stopped => tracing::info!("worker stopped by operator command"),
        ExitReason::Shutdown => tracing::info!("worker shut down"),
    }
    Ok(())
}

pub async fn run_once(
    config: &AppConfig,
    cancel: &CancellationToken,
    as_json: bool,
) -> Result<(), CliError> {
    let db = open_database(&ControlConfig::from(config)).await?;
    let client = PlatformClient::from_config(config)?;
    let tokens = TokenManager::new(client.clone());
    let decryptor = FieldDecryptor::new(&config.app_secret)?;
    let store = LibSqlOrderRepository::with_policy(db.connection(), config.merge_policy.clone());
    let control = LibSqlControlChannel::new(db.connection(), config.task_id.clone());

    let mut scheduler = SyncScheduler::new(
        SchedulerConfig::from_app_config(config),
        &client,
        &tokens,
        &store,
        &control,
        &decryptor,
    );
    let report = scheduler.run_once(cancel).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.windows.is_empty() {
        println!("Nothing to sync: the configured range is empty.");
        return Ok(());
    }
    for line in format_cycle_lines(&report) {
        println!("{line}");
    }
    Ok(())
}
