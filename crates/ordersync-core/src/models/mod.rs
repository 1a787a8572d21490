//! Data models for ordersync

mod control;
mod order;
mod window;

pub use control::{Command, ControlState, PendingCommand, WorkerStatus};
pub use order::{encrypted_phone, Order};
pub use window::{PartialReason, SyncWindow, WindowOutcome, WindowReport};
