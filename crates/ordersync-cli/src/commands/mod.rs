pub mod common;
pub mod control;
pub mod plan;
pub mod run;
