//! Sync window model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A resolved `[start, end)` range fetched as one pagination unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn start_ts(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_ts(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn span(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Why a window stopped before the upstream reported the end of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartialReason {
    /// Upstream returned the cursor it was just given
    StalledCursor { cursor: i64 },
    /// Upstream pointed back at a cursor already fetched in this window
    RepeatedCursor { cursor: i64 },
    /// The per-window page cap was reached
    PageLimit { pages: u32 },
}

impl fmt::Display for PartialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StalledCursor { cursor } => {
                write!(f, "pagination stalled at cursor {cursor}")
            }
            Self::RepeatedCursor { cursor } => {
                write!(f, "pagination looped back to cursor {cursor}")
            }
            Self::PageLimit { pages } => write!(f, "page limit of {pages} reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowOutcome {
    Complete,
    Partial(PartialReason),
}

impl WindowOutcome {
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }
}

/// Fetch progress for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowReport {
    pub window: SyncWindow,
    /// Upstream calls made
    pub pages: u32,
    /// Raw records received
    pub fetched: usize,
    /// Rows written by the upsert store
    pub stored: usize,
    /// Records without an identifier, or dropped by the decrypt policy
    pub skipped: usize,
    pub decrypt_failures: usize,
    pub outcome: WindowOutcome,
}

impl WindowReport {
    pub const fn new(window: SyncWindow) -> Self {
        Self {
            window,
            pages: 0,
            fetched: 0,
            stored: 0,
            skipped: 0,
            decrypt_failures: 0,
            outcome: WindowOutcome::Complete,
        }
    }

    /// One-line annotation for partial windows, `None` when complete.
    pub fn annotation(&self) -> Option<String> {
        match self.outcome {
            WindowOutcome::Complete => None,
            WindowOutcome::Partial(reason) => {
                Some(format!("window {} partially fetched: {reason}", self.window))
            }
        }
    }
}
