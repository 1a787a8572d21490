use std::io;

use ordersync_core::config::ConfigError;
use ordersync_core::crypto::DecryptError;
use ordersync_core::upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ordersync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("Invalid APP_SECRET: {0}")]
    Decrypt(#[from] DecryptError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to load env file {path}: {message}")]
    EnvFile { path: String, message: String },
    #[error("Invalid log filter: {0}")]
    LogFilter(String),
    #[error("No control row for task `{0}`; has the worker ever started?")]
    UnknownTask(String),
}
