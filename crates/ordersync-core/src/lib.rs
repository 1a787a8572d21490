//! ordersync-core - Core library for ordersync
//!
//! This crate contains the configuration, models, upstream client, storage
//! layer and sync loop used by the `ordersync` worker and operator CLI.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod paginator;
pub mod planner;
pub mod scheduler;
pub mod upstream;
pub mod util;

pub use config::{AppConfig, ControlConfig};
pub use error::{Error, Result};
pub use models::{Order, SyncWindow, WindowReport};
pub use scheduler::{CycleReport, ExitReason, SchedulerConfig, SyncScheduler};
