//! HTTPS client for the platform's OAuth and order query endpoints.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    parse_order_body, parse_token_body, AccessToken, CredentialSource, OrderPage, OrderSource,
    PageQuery, UpstreamError, UpstreamResult,
};
use crate::config::AppConfig;
use crate::util::{compact_text, is_http_url, normalize_text_option, unix_timestamp_now};

const TOKEN_PATH: &str = "/oauth/client_token/";
const ORDER_QUERY_PATH: &str = "/goodlife/v1/trade/order/query/";
const GRANT_TYPE: &str = "client_credential";

#[derive(Clone)]
pub struct PlatformClient {
    base_url: String,
    app_id: String,
    app_secret: String,
    account_id: String,
    client: reqwest::Client,
}

impl fmt::Debug for PlatformClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PlatformClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl PlatformClient {
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        account_id: impl Into<String>,
        timeout: Duration,
    ) -> UpstreamResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let app_id = required(app_id.into(), "app id")?;
        let app_secret = required(app_secret.into(), "app secret")?;
        let account_id = required(account_id.into(), "account id")?;

        Ok(Self {
            base_url,
            app_id,
            app_secret,
            account_id,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn from_config(config: &AppConfig) -> UpstreamResult<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.app_id.clone(),
            config.app_secret.clone(),
            config.account_id.clone(),
            config.http_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_key: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

impl CredentialSource for PlatformClient {
    async fn request_token(&self) -> UpstreamResult<AccessToken> {
        let response = self
            .client
            .post(format!("{}{TOKEN_PATH}", self.base_url))
            .header("Accept", "application/json")
            .json(&TokenRequest {
                client_key: &self.app_id,
                client_secret: &self.app_secret,
                grant_type: GRANT_TYPE,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        parse_token_body(&body, unix_timestamp_now())
    }
}

impl OrderSource for PlatformClient {
    async fn list_orders(
        &self,
        query: &PageQuery<'_>,
        token: &AccessToken,
    ) -> UpstreamResult<OrderPage> {
        let response = self
            .client
            .get(format!("{}{ORDER_QUERY_PATH}", self.base_url))
            .header("Accept", "application/json")
            .query(&query_params(query, &self.account_id, &token.token))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        parse_order_body(&body)
    }
}

fn query_params(
    query: &PageQuery<'_>,
    account_id: &str,
    access_token: &str,
) -> Vec<(&'static str, String)> {
    let options = query.options;
    let (start_key, end_key) = if options.use_create_time {
        ("create_order_start_time", "create_order_end_time")
    } else {
        ("update_order_start_time", "update_order_end_time")
    };

    let mut params = vec![
        ("access_token", access_token.to_string()),
        ("account_id", account_id.to_string()),
        ("cursor", query.cursor.to_string()),
        ("page_size", options.page_size.to_string()),
        (start_key, query.window.start_ts().to_string()),
        (end_key, query.window.end_ts().to_string()),
    ];
    if let Some(status) = &options.order_status {
        params.push(("order_status", status.clone()));
    }
    if options.get_secret_number {
        params.push(("get_secret_number", "true".to_string()));
    }
    params
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    description: Option<String>,
}

fn status_error(status: StatusCode, body: &str) -> UpstreamError {
    let message = parse_api_error(status, body);
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        UpstreamError::Unauthorized(message)
    } else {
        UpstreamError::Api(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.description) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> UpstreamResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        UpstreamError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(UpstreamError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

fn required(value: String, name: &str) -> UpstreamResult<String> {
    normalize_text_option(Some(value))
        .ok_or_else(|| UpstreamError::InvalidConfiguration(format!("{name} must not be empty")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::SyncWindow;
    use crate::upstream::FetchOptions;

    fn client() -> PlatformClient {
        PlatformClient::new(
            "https://open.example.com/",
            "app",
            "shh",
            "acct",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn window() -> SyncWindow {
        SyncWindow::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            Utc.timestamp_opt(1_700_086_400, 0).unwrap(),
        )
    }

    #[test]
    fn base_url_is_validated_and_trimmed() {
        assert_eq!(client().base_url(), "https://open.example.com");
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("open.example.com".to_string()).is_err());
    }

    #[test]
    fn blank_credentials_are_rejected() {
        let result = PlatformClient::new(
            "https://open.example.com",
            " ",
            "secret",
            "acct",
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(UpstreamError::InvalidConfiguration(_))));
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", client());
        assert!(!debug.contains("shh"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn query_uses_update_time_by_default() {
        let options = FetchOptions::default();
        let query = PageQuery {
            window: window(),
            cursor: 0,
            options: &options,
        };
        let params = query_params(&query, "acct", "tok");
        assert_eq!(
            params,
            vec![
                ("access_token", "tok".to_string()),
                ("account_id", "acct".to_string()),
                ("cursor", "0".to_string()),
                ("page_size", "50".to_string()),
                ("update_order_start_time", "1700000000".to_string()),
                ("update_order_end_time", "1700086400".to_string()),
            ]
        );
    }

    #[test]
    fn query_includes_optional_filters() {
        let options = FetchOptions {
            page_size: 100,
            order_status: Some("1".to_string()),
            get_secret_number: true,
            use_create_time: true,
        };
        let query = PageQuery {
            window: window(),
            cursor: 200,
            options: &options,
        };
        let params = query_params(&query, "acct", "tok");
        assert!(params.contains(&("create_order_start_time", "1700000000".to_string())));
        assert!(params.contains(&("order_status", "1".to_string())));
        assert!(params.contains(&("get_secret_number", "true".to_string())));
        assert!(!params.iter().any(|(key, _)| key.starts_with("update_order")));
    }

    #[test]
    fn auth_statuses_map_to_unauthorized() {
        assert!(status_error(StatusCode::UNAUTHORIZED, "").is_unauthorized());
        assert!(status_error(StatusCode::FORBIDDEN, "{\"message\":\"no\"}").is_unauthorized());
        let error = status_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(error, UpstreamError::Api(message) if message == "upstream down (502)"));
    }
}
