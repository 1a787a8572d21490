//! Splits the configured sync range into day-bounded windows.
//!
//! The upstream list endpoint only returns complete results for short
//! ranges, so each cycle walks the configured range one calendar day at a
//! time. Day boundaries are midnights in the configured UTC offset. Windows
//! are emitted oldest first; the first and last windows are truncated to the
//! exact range bounds.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::Serialize;

use crate::config::TimeRangeSpec;
use crate::error::{Error, Result};
use crate::models::SyncWindow;

const SECONDS_PER_DAY: i64 = 86_400;

/// A resolved `[start, end)` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeWindowPlanner {
    spec: TimeRangeSpec,
    offset: FixedOffset,
}

impl TimeWindowPlanner {
    pub const fn new(spec: TimeRangeSpec, offset: FixedOffset) -> Self {
        Self { spec, offset }
    }

    /// Plan windows for a cycle starting now.
    pub fn plan(&self) -> Result<(TimeRange, Vec<SyncWindow>)> {
        self.plan_at(Utc::now())
    }

    /// Plan windows as if the cycle started at `now`.
    pub fn plan_at(&self, now: DateTime<Utc>) -> Result<(TimeRange, Vec<SyncWindow>)> {
        let range = resolve_range(self.spec, self.offset, now)?;
        let windows = split_by_day(range, self.offset);
        Ok((range, windows))
    }
}

/// Resolve a configured range form into absolute bounds.
///
/// Trailing ranges end at `now` truncated to whole seconds, since the
/// upstream API only accepts second precision.
pub fn resolve_range(
    spec: TimeRangeSpec,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<TimeRange> {
    match spec {
        TimeRangeSpec::Dates { start, end } => {
            let to_utc = |naive| {
                offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|value| value.with_timezone(&Utc))
                    .ok_or_else(|| Error::InvalidInput(format!("unrepresentable time {naive}")))
            };
            Ok(TimeRange {
                start: to_utc(start)?,
                end: to_utc(end)?,
            })
        }
        TimeRangeSpec::Timestamps { start, end } => Ok(TimeRange {
            start: from_unix(start)?,
            end: from_unix(end)?,
        }),
        TimeRangeSpec::TrailingDays(days) => {
            let end = from_unix(now.timestamp())?;
            let start = from_unix(end.timestamp() - i64::from(days) * SECONDS_PER_DAY)?;
            Ok(TimeRange { start, end })
        }
    }
}

/// Split a range on local midnights. Empty or inverted ranges yield nothing.
pub fn split_by_day(range: TimeRange, offset: FixedOffset) -> Vec<SyncWindow> {
    let mut windows = Vec::new();
    if range.is_empty() {
        return windows;
    }

    let mut cursor = range.start;
    while cursor < range.end {
        let end = next_midnight(cursor, offset).min(range.end);
        windows.push(SyncWindow::new(cursor, end));
        cursor = end;
    }
    windows
}

fn next_midnight(instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    instant
        .with_timezone(&offset)
        .date_naive()
        .succ_opt()
        .and_then(|day| offset.from_local_datetime(&day.and_time(NaiveTime::MIN)).single())
        .map_or_else(
            || instant + TimeDelta::days(1),
            |midnight| midnight.with_timezone(&Utc),
        )
}

fn from_unix(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::InvalidInput(format!("timestamp out of range: {seconds}")))
}
