//! Upstream commerce platform access.
//!
//! [`CredentialSource`] and [`OrderSource`] are the seams the paginator and
//! token manager are written against; [`PlatformClient`] implements both
//! over HTTPS.

mod client;
mod token;

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::SyncWindow;
use crate::util::compact_text;

pub use client::PlatformClient;
pub use token::TokenManager;

/// Lifetime assumed when the token response omits `expires_in`.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7_200;

/// Tokens are refreshed this long before they expire.
pub const TOKEN_REFRESH_SKEW_SECS: i64 = 300;

/// Platform error codes meaning the access token is invalid or expired.
const INVALID_TOKEN_CODES: &[i64] = &[2_190_002, 2_190_008];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Invalid upstream configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Upstream HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Upstream API error: {0}")]
    Api(String),
    #[error("Invalid upstream payload: {0}")]
    InvalidPayload(String),
}

impl UpstreamError {
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: i64,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Whether the token can still be used at `now` without refreshing.
    pub const fn is_fresh_at(&self, now: i64) -> bool {
        now < self.expires_at.saturating_sub(TOKEN_REFRESH_SKEW_SECS)
    }
}

/// Issues access tokens.
#[allow(async_fn_in_trait)]
pub trait CredentialSource {
    async fn request_token(&self) -> UpstreamResult<AccessToken>;
}

/// Lists one page of orders.
#[allow(async_fn_in_trait)]
pub trait OrderSource {
    async fn list_orders(
        &self,
        query: &PageQuery<'_>,
        token: &AccessToken,
    ) -> UpstreamResult<OrderPage>;
}

/// Per-cycle request options shared by every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// 1..=100
    pub page_size: u32,
    pub order_status: Option<String>,
    pub get_secret_number: bool,
    /// Filter on creation time instead of last-update time
    pub use_create_time: bool,
}

impl FetchOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            page_size: config.page_size,
            order_status: config.order_status.clone(),
            get_secret_number: config.get_secret_number,
            use_create_time: config.use_create_time,
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            order_status: None,
            get_secret_number: false,
            use_create_time: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageQuery<'a> {
    pub window: SyncWindow,
    pub cursor: i64,
    pub options: &'a FetchOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderPage {
    pub orders: Vec<Value>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
    pub total_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: Option<i64>,
    message: Option<String>,
    data: Option<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error_code: Option<i64>,
    description: Option<String>,
}

impl TokenResponse {
    fn into_token(self, now: i64) -> UpstreamResult<AccessToken> {
        let (error_code, description) = self.data.as_ref().map_or((None, None), |data| {
            (data.error_code, data.description.as_deref())
        });
        check_codes(self.code, self.message.as_deref(), error_code, description)?;
        let data = self.data.ok_or_else(|| {
            UpstreamError::InvalidPayload("token response did not include data".to_string())
        })?;

        let token = data
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                UpstreamError::InvalidPayload(
                    "token response did not include access_token".to_string(),
                )
            })?;
        let expires_in = data
            .expires_in
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        Ok(AccessToken {
            token,
            expires_at: now.saturating_add(expires_in),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrderQueryResponse {
    code: Option<i64>,
    message: Option<String>,
    data: Option<OrderQueryData>,
}

#[derive(Debug, Deserialize)]
struct OrderQueryData {
    orders: Option<Vec<Value>>,
    search_after: Option<SearchAfter>,
    /// Older responses carried the cursor directly under `data`
    cursor: Option<Value>,
    has_more: Option<bool>,
    total_count: Option<i64>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchAfter {
    #[serde(rename = "CursorValue", default)]
    cursor_value: Vec<Value>,
}

impl OrderQueryData {
    /// `search_after.CursorValue` wins over the flat `cursor` field. An empty
    /// list means the end of data; more than one element is not an integer
    /// cursor.
    fn next_cursor(&self) -> UpstreamResult<Option<i64>> {
        if let Some(search_after) = &self.search_after {
            return match search_after.cursor_value.as_slice() {
                [] => Ok(None),
                [value] => parse_cursor(value),
                values => Err(UpstreamError::InvalidPayload(format!(
                    "expected one cursor value, got {}",
                    values.len()
                ))),
            };
        }
        self.cursor.as_ref().map(parse_cursor).transpose().map(Option::flatten)
    }
}

impl TryFrom<OrderQueryResponse> for OrderPage {
    type Error = UpstreamError;

    fn try_from(value: OrderQueryResponse) -> UpstreamResult<Self> {
        let (error_code, description) = value.data.as_ref().map_or((None, None), |data| {
            (data.error_code, data.description.as_deref())
        });
        check_codes(value.code, value.message.as_deref(), error_code, description)?;
        let data = value.data.ok_or_else(|| {
            UpstreamError::InvalidPayload("order response did not include data".to_string())
        })?;

        let next_cursor = data.next_cursor()?;
        Ok(Self {
            orders: data.orders.unwrap_or_default(),
            has_more: data.has_more.unwrap_or(next_cursor.is_some()),
            next_cursor,
            total_count: data.total_count,
        })
    }
}

/// Parse a token response body.
pub(crate) fn parse_token_body(body: &str, now: i64) -> UpstreamResult<AccessToken> {
    serde_json::from_str::<TokenResponse>(body)
        .map_err(|error| UpstreamError::InvalidPayload(format!("token response: {error}")))?
        .into_token(now)
}

/// Parse an order query response body.
pub(crate) fn parse_order_body(body: &str) -> UpstreamResult<OrderPage> {
    serde_json::from_str::<OrderQueryResponse>(body)
        .map_err(|error| UpstreamError::InvalidPayload(format!("order response: {error}")))?
        .try_into()
}

/// Cursors arrive as integers or numeric strings.
fn parse_cursor(value: &Value) -> UpstreamResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number.as_i64().map(Some).ok_or_else(|| {
            UpstreamError::InvalidPayload(format!("cursor is not an integer: {number}"))
        }),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => text.trim().parse().map(Some).map_err(|_| {
            UpstreamError::InvalidPayload(format!("cursor is not numeric: {}", compact_text(text)))
        }),
        other => Err(UpstreamError::InvalidPayload(format!(
            "unexpected cursor representation: {}",
            compact_text(&other.to_string())
        ))),
    }
}

fn check_codes(
    code: Option<i64>,
    message: Option<&str>,
    error_code: Option<i64>,
    description: Option<&str>,
) -> UpstreamResult<()> {
    let failure = [(code, message), (error_code, description)]
        .into_iter()
        .find_map(|(code, text)| code.filter(|code| *code != 0).map(|code| (code, text)));
    let Some((code, text)) = failure else {
        return Ok(());
    };

    let text = text
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or("unknown error");
    let message = format!("{} (code {code})", compact_text(text));
    if INVALID_TOKEN_CODES.contains(&code) {
        Err(UpstreamError::Unauthorized(message))
    } else {
        Err(UpstreamError::Api(message))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn access_token_debug_redacts_token() {
        let token = AccessToken {
            token: "secret".to_string(),
            expires_at: 123,
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn token_freshness_honours_refresh_skew() {
        let token = AccessToken {
            token: "t".to_string(),
            expires_at: 1_000,
        };
        assert!(token.is_fresh_at(699));
        assert!(!token.is_fresh_at(700));
        assert!(!token.is_fresh_at(2_000));
    }

    #[test]
    fn token_body_defaults_expiry() {
        let token = parse_token_body(r#"{"data":{"access_token":"abc"}}"#, 100).unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_at, 100 + DEFAULT_TOKEN_TTL_SECS);

        let token = parse_token_body(
            r#"{"data":{"access_token":"abc","expires_in":60,"error_code":0}}"#,
            100,
        )
        .unwrap();
        assert_eq!(token.expires_at, 160);
    }

    #[test]
    fn token_body_errors() {
        assert!(matches!(
            parse_token_body(r#"{"data":{"error_code":10005,"description":"bad key"}}"#, 0),
            Err(UpstreamError::Api(message)) if message.contains("bad key")
        ));
        assert!(matches!(
            parse_token_body(r#"{"data":{}}"#, 0),
            Err(UpstreamError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_token_body("<html>", 0),
            Err(UpstreamError::InvalidPayload(_))
        ));
    }

    #[test]
    fn order_body_accepts_integer_and_string_cursors() {
        let page = parse_order_body(
            r#"{"data":{"orders":[{"order_id":"1"}],"cursor":50,"has_more":true,"total_count":120}}"#,
        )
        .unwrap();
        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.next_cursor, Some(50));
        assert!(page.has_more);
        assert_eq!(page.total_count, Some(120));

        let page = parse_order_body(r#"{"data":{"orders":[],"cursor":"100"}}"#).unwrap();
        assert_eq!(page.next_cursor, Some(100));
        assert!(page.has_more, "a present cursor without has_more means more data");

        let page = parse_order_body(r#"{"code":0,"data":{"orders":null}}"#).unwrap();
        assert_eq!(page.next_cursor, None);
        assert!(!page.has_more);
        assert!(page.orders.is_empty());
    }

    #[test]
    fn order_body_reads_search_after_cursor() {
        let page = parse_order_body(
            r#"{"data":{"orders":[{"order_id":"1"},{"order_id":"2"}],
                "search_after":{"CursorValue":["1700000123"]},"total_count":500}}"#,
        )
        .unwrap();
        assert_eq!(page.orders.len(), 2);
        assert_eq!(page.next_cursor, Some(1_700_000_123));
        assert!(page.has_more);
        assert_eq!(page.total_count, Some(500));

        let page = parse_order_body(
            r#"{"data":{"orders":[],"search_after":{"CursorValue":[]},"cursor":50}}"#,
        )
        .unwrap();
        assert_eq!(page.next_cursor, None, "search_after takes precedence");
        assert!(!page.has_more);

        let page =
            parse_order_body(r#"{"data":{"orders":[],"search_after":{}}}"#).unwrap();
        assert!(!page.has_more);

        assert!(matches!(
            parse_order_body(r#"{"data":{"search_after":{"CursorValue":["1","2"]}}}"#),
            Err(UpstreamError::InvalidPayload(_))
        ));
    }

    #[test]
    fn order_body_rejects_malformed_cursor() {
        for body in [
            r#"{"data":{"cursor":"abc"}}"#,
            r#"{"data":{"cursor":1.5}}"#,
            r#"{"data":{"cursor":["1","2"]}}"#,
        ] {
            assert!(
                matches!(parse_order_body(body), Err(UpstreamError::InvalidPayload(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn order_body_maps_error_codes() {
        assert!(matches!(
            parse_order_body(r#"{"code":2190008,"message":"access_token expired"}"#),
            Err(UpstreamError::Unauthorized(_))
        ));
        assert!(matches!(
            parse_order_body(r#"{"data":{"error_code":2100004,"description":"busy"}}"#),
            Err(UpstreamError::Api(_))
        ));
    }
}
