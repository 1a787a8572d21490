//! Worker configuration loaded from the process environment.
//!
//! `AppConfig::from_env` snapshots the environment and delegates to
//! `from_lookup`, so every rule here can be exercised with a plain map.
//! Any error returned from this module is fatal: the worker must not start a
//! sync cycle with a half-understood configuration.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Days, FixedOffset, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::db::MergePolicy;
use crate::util::{is_http_url, parse_flag};

pub const DEFAULT_API_BASE_URL: &str = "https://open.douyin.com";
pub const DEFAULT_TASK_ID: &str = "order_sync";

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Conflicting configuration: {0}")]
    Conflict(String),
}

/// How the sync range is selected. Exactly one form may be configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRangeSpec {
    /// Wall-clock bounds in the configured UTC offset; `end` is exclusive.
    Dates {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// Unix seconds; `end` is exclusive.
    Timestamps { start: i64, end: i64 },
    /// The trailing `n` days ending now.
    TrailingDays(u32),
}

impl Default for TimeRangeSpec {
    fn default() -> Self {
        Self::TrailingDays(1)
    }
}

/// What the worker does after honouring a `STOP` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopBehavior {
    /// Leave the loop and let the process exit.
    #[default]
    Exit,
    /// Stay alive in `STOPPED` state until `START` arrives.
    Pause,
}

impl FromStr for StopBehavior {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exit" => Ok(Self::Exit),
            "pause" => Ok(Self::Pause),
            other => Err(ConfigError::Invalid(format!(
                "ON_STOP must be `exit` or `pause`, got `{other}`"
            ))),
        }
    }
}

/// What happens to a record whose contact field cannot be decrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecryptFailurePolicy {
    /// Store the record with the contact field left empty.
    #[default]
    Omit,
    /// Drop the record from the batch.
    Skip,
}

impl FromStr for DecryptFailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "omit" => Ok(Self::Omit),
            "skip" => Ok(Self::Skip),
            other => Err(ConfigError::Invalid(format!(
                "DECRYPT_FAILURE_POLICY must be `omit` or `skip`, got `{other}`"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_auth_token: Option<String>,
    pub app_id: String,
    pub app_secret: String,
    pub account_id: String,
    pub api_base_url: String,
    pub task_id: String,
    pub time_range: TimeRangeSpec,
    pub utc_offset: FixedOffset,
    pub order_status: Option<String>,
    pub sync_interval: Duration,
    pub error_retry: Duration,
    pub command_poll: Duration,
    pub page_size: u32,
    pub max_pages_per_window: u32,
    pub get_secret_number: bool,
    pub use_create_time: bool,
    pub http_timeout: Duration,
    pub on_stop: StopBehavior,
    pub decrypt_failure_policy: DecryptFailurePolicy,
    pub merge_policy: MergePolicy,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field(
                "database_auth_token",
                &self.database_auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("api_base_url", &self.api_base_url)
            .field("task_id", &self.task_id)
            .field("time_range", &self.time_range)
            .field("utc_offset", &self.utc_offset)
            .field("order_status", &self.order_status)
            .field("sync_interval", &self.sync_interval)
            .field("error_retry", &self.error_retry)
            .field("command_poll", &self.command_poll)
            .field("page_size", &self.page_size)
            .field("max_pages_per_window", &self.max_pages_per_window)
            .field("get_secret_number", &self.get_secret_number)
            .field("use_create_time", &self.use_create_time)
            .field("http_timeout", &self.http_timeout)
            .field("on_stop", &self.on_stop)
            .field("decrypt_failure_policy", &self.decrypt_failure_policy)
            .field("merge_policy", &self.merge_policy)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = required_trimmed(&lookup, "DATABASE_URL")?;
        let database_auth_token = optional_trimmed(&lookup, "DATABASE_AUTH_TOKEN");

        let app_id = required_trimmed(&lookup, "APP_ID")?;
        let app_secret = required_trimmed(&lookup, "APP_SECRET")?;
        let account_id = required_trimmed(&lookup, "ACCOUNT_ID")?;

        let api_base_url = value_or_default(&lookup, "API_BASE_URL", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !is_http_url(&api_base_url) {
            return Err(ConfigError::Invalid(
                "API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        let task_id = value_or_default(&lookup, "TASK_ID", DEFAULT_TASK_ID);
        let utc_offset = parse_utc_offset(&value_or_default(&lookup, "SYNC_UTC_OFFSET", "+00:00"))?;
        let time_range = parse_time_range(&lookup)?;
        let order_status = optional_trimmed(&lookup, "ORDER_STATUS");

        let sync_interval = bounded_integer(&lookup, "SYNC_INTERVAL", 3_600, 1..=604_800)?;
        let error_retry = bounded_integer(&lookup, "ERROR_RETRY_SECS", 60, 1..=86_400)?;
        let command_poll = bounded_integer(&lookup, "COMMAND_POLL_SECS", 10, 1..=3_600)?;
        let page_size = bounded_integer(&lookup, "PAGE_SIZE", 50, 1..=100)?;
        let max_pages_per_window =
            bounded_integer(&lookup, "MAX_PAGES_PER_WINDOW", 200, 1..=100_000)?;
        let http_timeout = bounded_integer(&lookup, "HTTP_TIMEOUT_SECS", 30, 1..=600)?;

        let get_secret_number =
            optional_trimmed(&lookup, "GET_SECRET_NUMBER").is_some_and(|value| parse_flag(&value));
        let use_create_time =
            optional_trimmed(&lookup, "USE_CREATE_TIME").is_some_and(|value| parse_flag(&value));

        let on_stop = optional_trimmed(&lookup, "ON_STOP")
            .map(|value| value.parse::<StopBehavior>())
            .transpose()?
            .unwrap_or_default();
        let decrypt_failure_policy = optional_trimmed(&lookup, "DECRYPT_FAILURE_POLICY")
            .map(|value| value.parse::<DecryptFailurePolicy>())
            .transpose()?
            .unwrap_or_default();
        let merge_policy = optional_trimmed(&lookup, "MERGE_POLICY")
            .map(|value| value.parse::<MergePolicy>())
            .transpose()
            .map_err(|error| ConfigError::Invalid(format!("MERGE_POLICY: {error}")))?
            .unwrap_or_default();

        Ok(Self {
            database_url,
            database_auth_token,
            app_id,
            app_secret,
            account_id,
            api_base_url,
            task_id,
            time_range,
            utc_offset,
            order_status,
            sync_interval: Duration::from_secs(sync_interval),
            error_retry: Duration::from_secs(error_retry),
            command_poll: Duration::from_secs(command_poll),
            page_size: u32::try_from(page_size).unwrap_or(100),
            max_pages_per_window: u32::try_from(max_pages_per_window).unwrap_or(u32::MAX),
            get_secret_number,
            use_create_time,
            http_timeout: Duration::from_secs(http_timeout),
            on_stop,
            decrypt_failure_policy,
            merge_policy,
        })
    }
}

/// Settings needed to reach the control row without upstream credentials.
#[derive(Clone)]
pub struct ControlConfig {
    pub database_url: String,
    pub database_auth_token: Option<String>,
    pub task_id: String,
}

impl fmt::Debug for ControlConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ControlConfig")
            .field("database_url", &self.database_url)
            .field(
                "database_auth_token",
                &self.database_auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl ControlConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required_trimmed(&lookup, "DATABASE_URL")?,
            database_auth_token: optional_trimmed(&lookup, "DATABASE_AUTH_TOKEN"),
            task_id: value_or_default(&lookup, "TASK_ID", DEFAULT_TASK_ID),
        })
    }
}

impl From<&AppConfig> for ControlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            database_url: config.database_url.clone(),
            database_auth_token: config.database_auth_token.clone(),
            task_id: config.task_id.clone(),
        }
    }
}

fn parse_time_range(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<TimeRangeSpec, ConfigError> {
    let start_date = optional_trimmed(&lookup, "START_DATE");
    let end_date = optional_trimmed(&lookup, "END_DATE");
    let start_time = optional_trimmed(&lookup, "START_TIME");
    let end_time = optional_trimmed(&lookup, "END_TIME");
    let sync_days = optional_trimmed(&lookup, "SYNC_DAYS");

    let dates_set = start_date.is_some() || end_date.is_some();
    let times_set = start_time.is_some() || end_time.is_some();
    let forms = [dates_set, times_set, sync_days.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if forms > 1 {
        return Err(ConfigError::Conflict(
            "set only one of START_DATE/END_DATE, START_TIME/END_TIME or SYNC_DAYS".to_string(),
        ));
    }

    if dates_set {
        let start = start_date.ok_or(ConfigError::MissingVar("START_DATE"))?;
        let end = end_date.ok_or(ConfigError::MissingVar("END_DATE"))?;
        return Ok(TimeRangeSpec::Dates {
            start: parse_date_bound(&start, false)
                .map_err(|error| ConfigError::Invalid(format!("START_DATE: {error}")))?,
            end: parse_date_bound(&end, true)
                .map_err(|error| ConfigError::Invalid(format!("END_DATE: {error}")))?,
        });
    }

    if times_set {
        let start = start_time.ok_or(ConfigError::MissingVar("START_TIME"))?;
        let end = end_time.ok_or(ConfigError::MissingVar("END_TIME"))?;
        let start = start.parse::<i64>().map_err(|_| {
            ConfigError::Invalid("START_TIME must be a unix timestamp in seconds".to_string())
        })?;
        let end = end.parse::<i64>().map_err(|_| {
            ConfigError::Invalid("END_TIME must be a unix timestamp in seconds".to_string())
        })?;
        return Ok(TimeRangeSpec::Timestamps { start, end });
    }

    match sync_days {
        Some(days) => {
            let days = days.parse::<u32>().map_err(|_| {
                ConfigError::Invalid("SYNC_DAYS must be an integer in [0, 3650]".to_string())
            })?;
            if days > 3_650 {
                return Err(ConfigError::Invalid(
                    "SYNC_DAYS must be in [0, 3650]".to_string(),
                ));
            }
            Ok(TimeRangeSpec::TrailingDays(days))
        }
        None => Ok(TimeRangeSpec::default()),
    }
}

/// Parse a date or date-time bound.
///
/// A date-only end bound covers the whole day, so it resolves to midnight of
/// the following day (ranges are end-exclusive).
pub fn parse_date_bound(raw: &str, is_end: bool) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(value);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            let date = if is_end {
                date.checked_add_days(Days::new(1))
                    .ok_or_else(|| format!("date out of range: {raw}"))?
            } else {
                date
            };
            return Ok(date.and_time(chrono::NaiveTime::MIN));
        }
    }
    Err(format!(
        "cannot parse `{raw}`; expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
    ))
}

/// Parse `+08:00`, `-0530`, `Z` or `UTC` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "SYNC_UTC_OFFSET must look like +08:00 or -05:30, got `{raw}`"
        ))
    };

    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.chars().next() {
        Some('+') => (1, &trimmed[1..]),
        Some('-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3_600 + minutes * 60)).ok_or_else(invalid)
}

fn bounded_integer(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let describe = || {
        format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        )
    };
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(describe()))?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(describe()))
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::MergeStrategy;

    fn base_map() -> HashMap<&'static str, &'static str> {
        let mut map = HashMap::new();
        map.insert("DATABASE_URL", "orders.db");
        map.insert("APP_ID", "app");
        map.insert("APP_SECRET", "sensitive-app-secret");
        map.insert("ACCOUNT_ID", "acct");
        map
    }

    fn load(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_minimum_settings() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = load(&map).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn config_defaults() {
        let config = load(&base_map()).unwrap();
        assert_eq!(config.time_range, TimeRangeSpec::TrailingDays(1));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_pages_per_window, 200);
        assert_eq!(config.sync_interval, Duration::from_secs(3_600));
        assert_eq!(config.error_retry, Duration::from_secs(60));
        assert_eq!(config.task_id, DEFAULT_TASK_ID);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.on_stop, StopBehavior::Exit);
        assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Omit);
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
        assert!(!config.use_create_time);
        assert!(!config.get_secret_number);
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let mut map = base_map();
        map.insert("DATABASE_AUTH_TOKEN", "sensitive-db-token");
        let config = load(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-app-secret"));
        assert!(!debug_output.contains("sensitive-db-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn conflicting_range_forms_are_rejected() {
        let mut map = base_map();
        map.insert("START_DATE", "2024-01-01");
        map.insert("END_DATE", "2024-01-02");
        map.insert("SYNC_DAYS", "3");
        let err = load(&map).unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));

        let mut map = base_map();
        map.insert("START_DATE", "2024-01-01");
        map.insert("START_TIME", "1700000000");
        assert!(matches!(load(&map).unwrap_err(), ConfigError::Conflict(_)));
    }

    #[test]
    fn half_a_pair_is_rejected() {
        let mut map = base_map();
        map.insert("START_TIME", "1700000000");
        let err = load(&map).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("END_TIME")));
    }

    #[test]
    fn date_only_end_covers_whole_day() {
        let mut map = base_map();
        map.insert("START_DATE", "2024-01-01");
        map.insert("END_DATE", "2024/01/03");
        let config = load(&map).unwrap();
        let TimeRangeSpec::Dates { start, end } = config.time_range else {
            panic!("expected date range");
        };
        assert_eq!(start.to_string(), "2024-01-01 00:00:00");
        assert_eq!(end.to_string(), "2024-01-04 00:00:00");
    }

    #[test]
    fn unparsable_dates_are_rejected() {
        let mut map = base_map();
        map.insert("START_DATE", "01/02/2024");
        map.insert("END_DATE", "2024-01-03");
        let err = load(&map).unwrap_err();
        assert!(err.to_string().contains("START_DATE"));
    }

    #[test]
    fn page_size_bounds_are_enforced() {
        let mut map = base_map();
        map.insert("PAGE_SIZE", "0");
        assert!(load(&map).is_err());

        map.insert("PAGE_SIZE", "101");
        assert!(load(&map).is_err());

        map.insert("PAGE_SIZE", "100");
        assert_eq!(load(&map).unwrap().page_size, 100);
    }

    #[test]
    fn optional_switches_are_parsed() {
        let mut map = base_map();
        map.insert("USE_CREATE_TIME", "true");
        map.insert("GET_SECRET_NUMBER", "1");
        map.insert("ON_STOP", "pause");
        map.insert("DECRYPT_FAILURE_POLICY", "skip");
        map.insert("MERGE_POLICY", "source_order_id=keep_existing");
        map.insert("SYNC_UTC_OFFSET", "+08:00");
        let config = load(&map).unwrap();

        assert!(config.use_create_time);
        assert!(config.get_secret_number);
        assert_eq!(config.on_stop, StopBehavior::Pause);
        assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Skip);
        assert_eq!(
            config.merge_policy.strategy_for("source_order_id"),
            MergeStrategy::KeepExisting
        );
        assert_eq!(config.utc_offset.local_minus_utc(), 8 * 3_600);
    }

    #[test]
    fn invalid_enums_are_rejected() {
        let mut map = base_map();
        map.insert("ON_STOP", "explode");
        assert!(load(&map).is_err());

        let mut map = base_map();
        map.insert("MERGE_POLICY", "raw_data=keep_existing");
        assert!(load(&map).unwrap_err().to_string().contains("MERGE_POLICY"));
    }

    #[test]
    fn control_config_skips_upstream_credentials() {
        let mut map = HashMap::new();
        map.insert("DATABASE_URL", " orders.db ");
        map.insert("DATABASE_AUTH_TOKEN", "sensitive-db-token");
        let control =
            ControlConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
                .unwrap();

        assert_eq!(control.database_url, "orders.db");
        assert_eq!(control.task_id, DEFAULT_TASK_ID);
        assert!(!format!("{control:?}").contains("sensitive-db-token"));

        let full = load(&base_map()).unwrap();
        assert_eq!(ControlConfig::from(&full).database_url, full.database_url);
    }

    #[test]
    fn utc_offset_parsing() {
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(
            parse_utc_offset("-0530").unwrap().local_minus_utc(),
            -(5 * 3_600 + 30 * 60)
        );
        assert!(parse_utc_offset("8").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }
}
