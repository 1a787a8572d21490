//! Cached access-token acquisition.

use tokio::sync::Mutex;

use super::{AccessToken, CredentialSource, UpstreamResult};
use crate::util::unix_timestamp_now;

/// Hands out a cached token, refreshing it near expiry or after
/// [`TokenManager::invalidate`].
#[derive(Debug)]
pub struct TokenManager<C> {
    source: C,
    cached: Mutex<Option<AccessToken>>,
}

impl<C: CredentialSource> TokenManager<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) -> UpstreamResult<AccessToken> {
        self.acquire_at(unix_timestamp_now()).await
    }

    pub(crate) async fn acquire_at(&self, now: i64) -> UpstreamResult<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh_at(now)) {
            return Ok(token.clone());
        }

        tracing::debug!("requesting access token");
        let token = self.source.request_token().await?;
        tracing::info!(expires_at = token.expires_at, "acquired access token");
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next acquire fetches a new one.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    pub const fn source(&self) -> &C {
        &self.source
    }
}
