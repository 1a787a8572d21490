//! The sync loop.
//!
//! Each cycle plans day windows, drains them oldest first through the
//! paginator and ingest sink, then reports through the control row and
//! sleeps. The sleep wakes early for shutdown and for operator `STOP`.
//!
//! ```text
//! Idle → Planning → Fetching → Reporting → Sleeping → Idle
//!            └──────────┴──→ Error → Reporting → Sleeping
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, DecryptFailurePolicy, StopBehavior};
use crate::crypto::FieldDecryptor;
use crate::db::{ControlChannel, OrderStore};
use crate::error::{Error, Result};
use crate::ingest::IngestSink;
use crate::models::{Command, PendingCommand, WindowReport, WorkerStatus};
use crate::paginator::Paginator;
use crate::planner::{TimeRange, TimeWindowPlanner};
use crate::upstream::{CredentialSource, FetchOptions, OrderSource, TokenManager};
use crate::util::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Planning,
    Fetching,
    Reporting,
    Sleeping,
    Error,
    Paused,
    Terminated,
}

impl SchedulerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Fetching => "fetching",
            Self::Reporting => "reporting",
            Self::Sleeping => "sleeping",
            Self::Error => "error",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why [`SyncScheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// An operator `STOP` with `ON_STOP=exit`
    Stopped,
    /// The cancellation token fired
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub planner: TimeWindowPlanner,
    pub fetch: FetchOptions,
    pub max_pages_per_window: u32,
    pub sync_interval: Duration,
    pub error_retry: Duration,
    pub command_poll: Duration,
    pub on_stop: StopBehavior,
    pub decrypt_failure_policy: DecryptFailurePolicy,
}

impl SchedulerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            planner: TimeWindowPlanner::new(config.time_range, config.utc_offset),
            fetch: FetchOptions::from_config(config),
            max_pages_per_window: config.max_pages_per_window,
            sync_interval: config.sync_interval,
            error_retry: config.error_retry,
            command_poll: config.command_poll,
            on_stop: config.on_stop,
            decrypt_failure_policy: config.decrypt_failure_policy,
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub range: TimeRange,
    pub windows: Vec<WindowReport>,
    /// A `STOP` arrived between windows and the rest were not started
    pub stopped_early: bool,
}

impl CycleReport {
    const fn new(range: TimeRange) -> Self {
        Self {
            range,
            windows: Vec::new(),
            stopped_early: false,
        }
    }

    pub fn fetched(&self) -> usize {
        self.windows.iter().map(|window| window.fetched).sum()
    }

    pub fn stored(&self) -> usize {
        self.windows.iter().map(|window| window.stored).sum()
    }

    pub fn skipped(&self) -> usize {
        self.windows.iter().map(|window| window.skipped).sum()
    }

    pub fn decrypt_failures(&self) -> usize {
        self.windows.iter().map(|window| window.decrypt_failures).sum()
    }

    pub fn partial_windows(&self) -> impl Iterator<Item = &WindowReport> {
        self.windows.iter().filter(|window| window.outcome.is_partial())
    }

    /// Annotations for partial windows joined into one line.
    pub fn partial_summary(&self) -> Option<String> {
        let annotations: Vec<String> = self
            .windows
            .iter()
            .filter_map(WindowReport::annotation)
            .collect();
        (!annotations.is_empty()).then(|| annotations.join("; "))
    }
}

enum Wake {
    Elapsed,
    StopRequested,
    Shutdown,
}

pub struct SyncScheduler<'a, O, C, S, K> {
    config: SchedulerConfig,
    source: &'a O,
    tokens: &'a TokenManager<C>,
    store: &'a S,
    control: &'a K,
    decryptor: &'a FieldDecryptor,
    state: SchedulerState,
}

impl<'a, O, C, S, K> SyncScheduler<'a, O, C, S, K>
where
    O: OrderSource,
    C: CredentialSource,
    S: OrderStore,
    K: ControlChannel,
{
    pub const fn new(
        config: SchedulerConfig,
        source: &'a O,
        tokens: &'a TokenManager<C>,
        store: &'a S,
        control: &'a K,
        decryptor: &'a FieldDecryptor,
    ) -> Self {
        Self {
            config,
            source,
            tokens,
            store,
            control,
            decryptor,
            state: SchedulerState::Idle,
        }
    }

    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "scheduler state");
            self.state = next;
        }
    }

    /// Run until an operator `STOP` (with `ON_STOP=exit`) or cancellation.
    ///
    /// Cycle failures are reported and retried after `error_retry`; only
    /// failures outside a cycle are returned.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ExitReason> {
        self.control.ensure_row().await?;
        tracing::info!(
            interval_secs = self.config.sync_interval.as_secs(),
            on_stop = ?self.config.on_stop,
            "sync worker started"
        );

        loop {
            self.transition(SchedulerState::Idle);
            if cancel.is_cancelled() {
                return Ok(self.terminate(ExitReason::Shutdown).await);
            }

            match self.poll_command().await {
                PendingCommand::Command(Command::Stop) => {
                    if let Some(reason) = self.handle_stop(cancel).await? {
                        return Ok(reason);
                    }
                }
                PendingCommand::Command(Command::Start) => self.acknowledge_start().await,
                PendingCommand::None | PendingCommand::Unrecognized(_) => {}
            }

            let outcome = self.run_cycle(cancel).await;
            if matches!(outcome, Err(Error::Cancelled)) {
                return Ok(self.terminate(ExitReason::Shutdown).await);
            }
            self.finish_cycle(&outcome).await;
            let delay = match outcome {
                Ok(report) if report.stopped_early => continue,
                Ok(_) => self.config.sync_interval,
                Err(_) => self.config.error_retry,
            };

            self.transition(SchedulerState::Sleeping);
            tracing::info!(secs = delay.as_secs(), "sleeping until next cycle");
            match self.wait(delay, cancel).await {
                Wake::Elapsed | Wake::StopRequested => {}
                Wake::Shutdown => return Ok(self.terminate(ExitReason::Shutdown).await),
            }
        }
    }

    /// Run a single cycle and report its outcome, as `run` would.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.control.ensure_row().await?;
        let outcome = self.run_cycle(cancel).await;
        if matches!(outcome, Err(Error::Cancelled)) {
            self.terminate(ExitReason::Shutdown).await;
        } else {
            self.finish_cycle(&outcome).await;
        }
        outcome
    }

    /// Plan the configured range and drain every window, oldest first.
    ///
    /// A `STOP` observed between windows ends the cycle early; the window in
    /// flight is always finished.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.transition(SchedulerState::Planning);
        let (range, windows) = self.config.planner.plan()?;
        tracing::info!(
            start = %range.start,
            end = %range.end,
            windows = windows.len(),
            "starting sync cycle"
        );
        self.control.report(WorkerStatus::Running, None).await?;

        let mut report = CycleReport::new(range);
        self.transition(SchedulerState::Fetching);
        let paginator = Paginator::new(
            self.source,
            self.tokens,
            &self.config.fetch,
            self.config.max_pages_per_window,
        );

        for window in windows {
            if self.poll_command().await.is_stop() {
                tracing::info!(%window, "stop requested, not starting further windows");
                report.stopped_early = true;
                break;
            }

            let mut sink =
                IngestSink::new(self.store, self.decryptor, self.config.decrypt_failure_policy);
            let window_report = paginator.fetch_window(window, &mut sink, cancel).await?;
            tracing::info!(
                %window,
                pages = window_report.pages,
                fetched = window_report.fetched,
                stored = window_report.stored,
                skipped = window_report.skipped,
                decrypt_failures = window_report.decrypt_failures,
                partial = window_report.outcome.is_partial(),
                "window finished"
            );
            self.control.heartbeat().await?;
            report.windows.push(window_report);
        }

        if !report.stopped_early {
            self.control.record_sync(range.end.timestamp()).await?;
        }
        Ok(report)
    }

    /// Write the cycle outcome to the control row.
    ///
    /// Partial windows leave an annotation with status `IDLE`; a clean cycle
    /// clears the error text.
    async fn finish_cycle(&mut self, outcome: &Result<CycleReport>) {
        let (status, message) = match outcome {
            Ok(report) => {
                self.transition(SchedulerState::Reporting);
                tracing::info!(
                    windows = report.windows.len(),
                    fetched = report.fetched(),
                    stored = report.stored(),
                    skipped = report.skipped(),
                    decrypt_failures = report.decrypt_failures(),
                    stopped_early = report.stopped_early,
                    "sync cycle finished"
                );
                (WorkerStatus::Idle, report.partial_summary())
            }
            Err(error) => {
                self.transition(SchedulerState::Error);
                tracing::error!(%error, "sync cycle failed");
                self.transition(SchedulerState::Reporting);
                (WorkerStatus::Error, Some(sanitize(error)))
            }
        };

        if let Err(error) = self.control.report(status, message.as_deref()).await {
            tracing::error!(%error, "failed to write worker status");
        }
    }

    /// Honour a latched `STOP`. Returns the exit reason, or `None` once a
    /// paused worker sees `START` or anything other than `STOP`.
    async fn handle_stop(&mut self, cancel: &CancellationToken) -> Result<Option<ExitReason>> {
        match self.config.on_stop {
            StopBehavior::Exit => {
                tracing::info!("stop command received, exiting");
                Ok(Some(self.terminate(ExitReason::Stopped).await))
            }
            StopBehavior::Pause => self.pause(cancel).await,
        }
    }

    async fn pause(&mut self, cancel: &CancellationToken) -> Result<Option<ExitReason>> {
        self.transition(SchedulerState::Paused);
        self.control.report(WorkerStatus::Stopped, None).await?;
        tracing::info!("stop command received, paused until START");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Ok(Some(self.terminate(ExitReason::Shutdown).await));
                }
                () = sleep(self.config.command_poll) => {}
            }

            match self.poll_command().await {
                PendingCommand::Command(Command::Start) => {
                    self.acknowledge_start().await;
                    return Ok(None);
                }
                PendingCommand::None | PendingCommand::Unrecognized(_) => {
                    tracing::info!("stop command no longer pending, resuming");
                    return Ok(None);
                }
                PendingCommand::Command(Command::Stop) => {
                    if let Err(error) = self.control.heartbeat().await {
                        tracing::warn!(%error, "failed to write heartbeat");
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, polling the command channel every `command_poll`.
    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> Wake {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Wake::Elapsed;
            }
            let step = self.config.command_poll.min(deadline - now);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Wake::Shutdown,
                () = sleep(step) => {}
            }

            if Instant::now() < deadline {
                if self.poll_command().await.is_stop() {
                    return Wake::StopRequested;
                }
                if let Err(error) = self.control.heartbeat().await {
                    tracing::warn!(%error, "failed to write heartbeat");
                }
            }
        }
    }

    /// Read the pending command. Read failures count as no command.
    async fn poll_command(&self) -> PendingCommand {
        match self.control.read_command().await {
            Ok(PendingCommand::Unrecognized(value)) => {
                tracing::warn!(command = %value, "ignoring unrecognized command");
                PendingCommand::Unrecognized(value)
            }
            Ok(command) => command,
            Err(error) => {
                tracing::warn!(%error, "failed to read command");
                PendingCommand::None
            }
        }
    }

    async fn acknowledge_start(&self) {
        match self.control.acknowledge(Command::Start).await {
            Ok(true) => tracing::info!("start command acknowledged"),
            Ok(false) => tracing::debug!("start command already cleared"),
            Err(error) => tracing::warn!(%error, "failed to acknowledge start command"),
        }
        if let Err(error) = self.control.report(WorkerStatus::Idle, None).await {
            tracing::warn!(%error, "failed to write worker status");
        }
    }

    async fn terminate(&mut self, reason: ExitReason) -> ExitReason {
        self.transition(SchedulerState::Terminated);
        if let Err(error) = self.control.report(WorkerStatus::Stopped, None).await {
            tracing::error!(%error, "failed to write final status");
        }
        tracing::info!(?reason, "sync worker stopped");
        reason
    }
}
