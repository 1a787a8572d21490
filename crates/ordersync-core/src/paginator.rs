//! Per-window page loop with a stalled-cursor circuit breaker.

use std::collections::HashSet;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::{PartialReason, SyncWindow, WindowOutcome, WindowReport};
use crate::upstream::{
    AccessToken, CredentialSource, FetchOptions, OrderPage, OrderSource, PageQuery, TokenManager,
};

/// Default cap on upstream calls per window.
pub const DEFAULT_MAX_PAGES: u32 = 200;

/// Receives each page before the next one is requested.
#[allow(async_fn_in_trait)]
pub trait PageSink {
    /// Persist one page, updating the window's counters.
    async fn accept(&mut self, orders: Vec<Value>, report: &mut WindowReport) -> Result<()>;
}

pub struct Paginator<'a, O, C> {
    source: &'a O,
    tokens: &'a TokenManager<C>,
    options: &'a FetchOptions,
    max_pages: u32,
}

impl<'a, O, C> Paginator<'a, O, C>
where
    O: OrderSource,
    C: CredentialSource,
{
    pub const fn new(
        source: &'a O,
        tokens: &'a TokenManager<C>,
        options: &'a FetchOptions,
        max_pages: u32,
    ) -> Self {
        Self {
            source,
            tokens,
            options,
            max_pages,
        }
    }

    /// Drain one window, handing every page to `sink`.
    ///
    /// Returns `Err(Error::Cancelled)` if `cancel` fires during an upstream
    /// call; pages already handed to the sink stay committed.
    pub async fn fetch_window(
        &self,
        window: SyncWindow,
        sink: &mut impl PageSink,
        cancel: &CancellationToken,
    ) -> Result<WindowReport> {
        let mut report = WindowReport::new(window);
        let mut cursor = 0_i64;
        let mut visited = HashSet::from([cursor]);

        loop {
            if report.pages >= self.max_pages {
                tracing::warn!(%window, pages = report.pages, "page limit reached, window is partial");
                report.outcome = WindowOutcome::Partial(PartialReason::PageLimit {
                    pages: report.pages,
                });
                break;
            }

            let page = self.fetch_page(window, cursor, cancel).await?;
            report.pages += 1;
            report.fetched += page.orders.len();
            tracing::debug!(
                %window,
                cursor,
                records = page.orders.len(),
                has_more = page.has_more,
                next_cursor = ?page.next_cursor,
                "fetched page"
            );

            let next_cursor = page.next_cursor.filter(|_| page.has_more);
            sink.accept(page.orders, &mut report).await?;

            match next_cursor {
                Some(next) if next == cursor => {
                    tracing::warn!(%window, cursor, "upstream returned the same cursor, window is partial");
                    report.outcome =
                        WindowOutcome::Partial(PartialReason::StalledCursor { cursor });
                    break;
                }
                Some(next) if !visited.insert(next) => {
                    tracing::warn!(%window, cursor, next, "upstream cursor looped back, window is partial");
                    report.outcome =
                        WindowOutcome::Partial(PartialReason::RepeatedCursor { cursor: next });
                    break;
                }
                Some(next) => cursor = next,
                None => break,
            }
        }

        Ok(report)
    }

    /// Fetch one page, refreshing the token and retrying once on rejection.
    async fn fetch_page(
        &self,
        window: SyncWindow,
        cursor: i64,
        cancel: &CancellationToken,
    ) -> Result<OrderPage> {
        let query = PageQuery {
            window,
            cursor,
            options: self.options,
        };

        let token = self.acquire(cancel).await?;
        match self.list(&query, &token, cancel).await {
            Err(Error::Upstream(error)) if error.is_unauthorized() => {
                tracing::warn!(%error, "access token rejected, refreshing");
                self.tokens.invalidate().await;
                let token = self.acquire(cancel).await?;
                self.list(&query, &token, cancel).await
            }
            other => other,
        }
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<AccessToken> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            token = self.tokens.acquire() => Ok(token?),
        }
    }

    async fn list(
        &self,
        query: &PageQuery<'_>,
        token: &AccessToken,
        cancel: &CancellationToken,
    ) -> Result<OrderPage> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            page = self.source.list_orders(query, token) => Ok(page?),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::upstream::{UpstreamError, UpstreamResult};

    struct StaticCredentials {
        issued: AtomicUsize,
    }

    impl CredentialSource for StaticCredentials {
        async fn request_token(&self) -> UpstreamResult<AccessToken> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                token: format!("token-{n}"),
                expires_at: i64::MAX,
            })
        }
    }

    fn credentials() -> TokenManager<StaticCredentials> {
        TokenManager::new(StaticCredentials {
            issued: AtomicUsize::new(0),
        })
    }

    /// Replays scripted responses and records the cursors it was asked for.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<UpstreamResult<OrderPage>>>,
        cursors: Mutex<Vec<i64>>,
        tokens: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<UpstreamResult<OrderPage>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn cursors(&self) -> Vec<i64> {
            self.cursors.lock().unwrap().clone()
        }
    }

    impl OrderSource for ScriptedSource {
        async fn list_orders(
            &self,
            query: &PageQuery<'_>,
            token: &AccessToken,
        ) -> UpstreamResult<OrderPage> {
            self.cursors.lock().unwrap().push(query.cursor);
            self.tokens.lock().unwrap().push(token.token.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::Api("script exhausted".to_string())))
        }
    }

    fn page(ids: std::ops::Range<usize>, next_cursor: Option<i64>, has_more: bool) -> OrderPage {
        OrderPage {
            orders: ids.map(|id| json!({ "order_id": id.to_string() })).collect(),
            next_cursor,
            has_more,
            total_count: None,
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        pages: Vec<usize>,
    }

    impl PageSink for CollectingSink {
        async fn accept(&mut self, orders: Vec<Value>, report: &mut WindowReport) -> Result<()> {
            report.stored += orders.len();
            self.pages.push(orders.len());
            Ok(())
        }
    }

    fn window() -> SyncWindow {
        SyncWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn drains_pages_until_upstream_reports_end() {
        let source = ScriptedSource::new(vec![
            Ok(page(0..50, Some(50), true)),
            Ok(page(50..100, Some(100), true)),
            Ok(page(100..150, Some(150), false)),
        ]);
        let tokens = credentials();
        let options = FetchOptions::default();
        let mut sink = CollectingSink::default();

        let report = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 50, 100]);
        assert_eq!(sink.pages, vec![50, 50, 50]);
        assert_eq!(report.pages, 3);
        assert_eq!(report.fetched, 150);
        assert_eq!(report.outcome, WindowOutcome::Complete);
    }

    #[tokio::test]
    async fn stalled_cursor_stops_after_one_extra_call() {
        let source = ScriptedSource::new(vec![
            Ok(page(0..50, Some(50), true)),
            Ok(page(50..60, Some(50), true)),
            Ok(page(60..70, Some(50), true)),
        ]);
        let tokens = credentials();
        let options = FetchOptions::default();
        let mut sink = CollectingSink::default();

        let report = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 50]);
        assert_eq!(
            report.outcome,
            WindowOutcome::Partial(PartialReason::StalledCursor { cursor: 50 })
        );
        assert_eq!(report.fetched, 60);
        assert!(report.annotation().unwrap().contains("stalled"));
    }

    #[tokio::test]
    async fn looping_cursor_stops_at_first_revisit() {
        let source = ScriptedSource::new(
            (0..10)
                .map(|n| Ok(page(n * 5..n * 5 + 5, Some(if n % 2 == 0 { 50 } else { 0 }), true)))
                .collect(),
        );
        let tokens = credentials();
        let options = FetchOptions::default();
        let mut sink = CollectingSink::default();

        let report = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 50]);
        assert_eq!(
            report.outcome,
            WindowOutcome::Partial(PartialReason::RepeatedCursor { cursor: 0 })
        );
        assert_eq!(report.fetched, 10);
        assert!(report.annotation().unwrap().contains("looped back to cursor 0"));
    }

    #[tokio::test]
    async fn missing_cursor_ends_window() {
        let source = ScriptedSource::new(vec![Ok(page(0..3, None, true))]);
        let tokens = credentials();
        let options = FetchOptions::default();

        let report = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut CollectingSink::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.pages, 1);
        assert_eq!(report.outcome, WindowOutcome::Complete);
    }

    #[tokio::test]
    async fn page_cap_marks_window_partial() {
        let source = ScriptedSource::new(
            (0..5)
                .map(|n| Ok(page(0..1, Some(n + 1), true)))
                .collect(),
        );
        let tokens = credentials();
        let options = FetchOptions::default();

        let report = Paginator::new(&source, &tokens, &options, 3)
            .fetch_window(window(), &mut CollectingSink::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 1, 2]);
        assert_eq!(
            report.outcome,
            WindowOutcome::Partial(PartialReason::PageLimit { pages: 3 })
        );
    }

    #[tokio::test]
    async fn unauthorized_refreshes_token_and_retries_once() {
        let source = ScriptedSource::new(vec![
            Err(UpstreamError::Unauthorized("expired".to_string())),
            Ok(page(0..2, None, false)),
        ]);
        let tokens = credentials();
        let options = FetchOptions::default();

        let report = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut CollectingSink::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(source.cursors(), vec![0, 0]);
        assert_eq!(
            source.tokens.lock().unwrap().clone(),
            vec!["token-1".to_string(), "token-2".to_string()]
        );
    }

    #[tokio::test]
    async fn second_unauthorized_aborts() {
        let source = ScriptedSource::new(vec![
            Err(UpstreamError::Unauthorized("expired".to_string())),
            Err(UpstreamError::Unauthorized("still expired".to_string())),
            Ok(page(0..2, None, false)),
        ]);
        let tokens = credentials();
        let options = FetchOptions::default();

        let result = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut CollectingSink::default(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(Error::Upstream(UpstreamError::Unauthorized(_)))
        ));
        assert_eq!(source.cursors().len(), 2);
    }

    #[tokio::test]
    async fn other_upstream_errors_abort_without_retry() {
        let source = ScriptedSource::new(vec![
            Ok(page(0..5, Some(5), true)),
            Err(UpstreamError::InvalidPayload("cursor".to_string())),
        ]);
        let tokens = credentials();
        let options = FetchOptions::default();
        let mut sink = CollectingSink::default();

        let result = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut sink, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Upstream(_))));
        assert_eq!(source.cursors(), vec![0, 5]);
        assert_eq!(sink.pages, vec![5], "the first page stays committed");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_calling_upstream() {
        let source = ScriptedSource::new(vec![Ok(page(0..5, None, false))]);
        let tokens = credentials();
        let options = FetchOptions::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Paginator::new(&source, &tokens, &options, DEFAULT_MAX_PAGES)
            .fetch_window(window(), &mut CollectingSink::default(), &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(source.cursors().is_empty());
    }
}
