//! Heartbeat and command channel over the `task_monitor` table
//!
//! The worker owns the status columns and the operator owns
//! `target_command`. Every operation is one statement, so neither side can
//! clobber the other's columns.

use libsql::{Connection, Value};

use crate::error::Result;
use crate::models::{Command, ControlState, PendingCommand, WorkerStatus};
use crate::util::unix_timestamp_now;

/// Worker-side control operations
#[allow(async_fn_in_trait)]
pub trait ControlChannel {
    /// Create the control row if it does not exist yet
    async fn ensure_row(&self) -> Result<()>;

    /// Write status, error text and heartbeat together
    async fn report(&self, status: WorkerStatus, error: Option<&str>) -> Result<()>;

    /// Refresh the liveness timestamp only
    async fn heartbeat(&self) -> Result<()>;

    /// Record the end of the last fully attempted range
    async fn record_sync(&self, last_sync_time: i64) -> Result<()>;

    /// Read the pending operator command
    async fn read_command(&self) -> Result<PendingCommand>;

    /// Clear `command` if it is still the pending one; returns whether it was
    async fn acknowledge(&self, command: Command) -> Result<bool>;
}

/// libSQL implementation of `ControlChannel`, plus the operator operations
pub struct LibSqlControlChannel<'a> {
    conn: &'a Connection,
    task_id: String,
}

impl<'a> LibSqlControlChannel<'a> {
    pub fn new(conn: &'a Connection, task_id: impl Into<String>) -> Self {
        Self {
            conn,
            task_id: task_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Operator: set the pending command, creating the row if needed
    pub async fn send_command(&self, command: Command) -> Result<()> {
        let now = unix_timestamp_now();
        self.conn
            .execute(
                "INSERT INTO task_monitor (task_id, target_command, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(task_id) DO UPDATE SET
                    target_command = excluded.target_command,
                    updated_at = excluded.updated_at",
                libsql::params![self.task_id.as_str(), command.as_str(), now],
            )
            .await?;
        Ok(())
    }

    /// Operator: clear whatever command is pending
    pub async fn clear_command(&self) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE task_monitor SET target_command = NULL, updated_at = ?1
                 WHERE task_id = ?2 AND target_command IS NOT NULL",
                libsql::params![unix_timestamp_now(), self.task_id.as_str()],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Read the whole control row
    pub async fn snapshot(&self) -> Result<Option<ControlState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT task_id, status, last_heartbeat, last_sync_time, target_command,
                        error_message, created_at, updated_at
                 FROM task_monitor WHERE task_id = ?",
                [self.task_id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(ControlState {
            task_id: row.get(0)?,
            status: row.get(1)?,
            last_heartbeat: row.get(2)?,
            last_sync_time: row.get(3)?,
            target_command: row.get(4)?,
            error_message: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        }))
    }
}

impl ControlChannel for LibSqlControlChannel<'_> {
    async fn ensure_row(&self) -> Result<()> {
        let now = unix_timestamp_now();
        self.conn
            .execute(
                "INSERT INTO task_monitor (task_id, created_at, updated_at) VALUES (?1, ?2, ?2)
                 ON CONFLICT(task_id) DO NOTHING",
                libsql::params![self.task_id.as_str(), now],
            )
            .await?;
        Ok(())
    }

    async fn report(&self, status: WorkerStatus, error: Option<&str>) -> Result<()> {
        let now = unix_timestamp_now();
        let error = error.map_or(Value::Null, |text| Value::Text(text.to_string()));
        self.conn
            .execute(
                "INSERT INTO task_monitor
                    (task_id, status, error_message, last_heartbeat, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?4)
                 ON CONFLICT(task_id) DO UPDATE SET
                    status = excluded.status,
                    error_message = excluded.error_message,
                    last_heartbeat = excluded.last_heartbeat,
                    updated_at = excluded.updated_at",
                libsql::params![self.task_id.as_str(), status.as_str(), error, now],
            )
            .await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        let now = unix_timestamp_now();
        self.conn
            .execute(
                "UPDATE task_monitor SET last_heartbeat = ?1, updated_at = ?1 WHERE task_id = ?2",
                libsql::params![now, self.task_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn record_sync(&self, last_sync_time: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE task_monitor SET last_sync_time = ?1, updated_at = ?2 WHERE task_id = ?3",
                libsql::params![last_sync_time, unix_timestamp_now(), self.task_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn read_command(&self) -> Result<PendingCommand> {
        let mut rows = self
            .conn
            .query(
                "SELECT target_command FROM task_monitor WHERE task_id = ?",
                [self.task_id.as_str()],
            )
            .await?;

        let raw: Option<String> = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => None,
        };
        Ok(PendingCommand::parse(raw.as_deref()))
    }

    async fn acknowledge(&self, command: Command) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE task_monitor SET target_command = NULL, updated_at = ?1
                 WHERE task_id = ?2 AND UPPER(TRIM(target_command)) = ?3",
                libsql::params![unix_timestamp_now(), self.task_id.as_str(), command.as_str()],
            )
            .await?;
        Ok(changed > 0)
    }
}
