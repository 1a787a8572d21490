//! Database layer for ordersync

mod connection;
mod control_repository;
mod migrations;
mod order_repository;

pub use connection::{Database, DatabaseTarget};
pub use control_repository::{ControlChannel, LibSqlControlChannel};
pub use order_repository::{
    LibSqlOrderRepository, MergePolicy, MergeStrategy, OrderStore, MERGEABLE_COLUMNS,
};
