//! Worker control-row model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Worker status as reported through the heartbeat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Running,
    Idle,
    Error,
    Stopped,
}

impl WorkerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Idle => "IDLE",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "IDLE" => Ok(Self::Idle),
            "ERROR" => Ok(Self::Error),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(format!("unknown worker status `{other}`")),
        }
    }
}

/// Operator command written into `task_monitor.target_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Stop,
    Start,
}

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Start => "START",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command field as observed by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCommand {
    /// Field is NULL or blank
    None,
    Command(Command),
    /// Anything else; logged and ignored
    Unrecognized(String),
}

impl PendingCommand {
    /// Classify a raw command value. Matching is case-insensitive.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::None;
        };
        match raw.to_ascii_uppercase().as_str() {
            "STOP" => Self::Command(Command::Stop),
            "START" => Self::Command(Command::Start),
            _ => Self::Unrecognized(raw.to_string()),
        }
    }

    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Command(Command::Stop))
    }
}

/// Snapshot of one `task_monitor` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub task_id: String,
    /// Raw status text; external tooling may write values we don't know
    pub status: Option<String>,
    /// Unix seconds
    pub last_heartbeat: Option<i64>,
    /// Unix seconds; end of the last fully attempted range
    pub last_sync_time: Option<i64>,
    pub target_command: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ControlState {
    pub fn worker_status(&self) -> Option<WorkerStatus> {
        self.status.as_deref().and_then(|value| value.parse().ok())
    }

    pub fn pending_command(&self) -> PendingCommand {
        PendingCommand::parse(self.target_command.as_deref())
    }
}
