//! Infinite-scroll pagination state for the catalog list.
//!
//! The list view owns one [`Paginator`]. The initial page load is
//! one-shot: once attempted it will not re-fire until the user asks to
//! retry, so a flapping connection cannot stampede the API. Subsequent
//! pages are pulled when the scroll sentinel becomes visible, guarded
//! against exhausted cursors. Loads cannot overlap: every load runs
//! through `&mut self`, so a second one cannot start while the first is
//! still borrowed, and an abandoned load leaves no partial state behind.

use crate::{load_page, FetchError, Fetcher, ItemDetail};
use dexkit_common::CancelSignal;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Where the list currently stands in the paginated feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    /// URL of the next unfetched page, if any.
    pub next_url: Option<Url>,
    /// Whether another page exists beyond what has been loaded.
    pub has_more: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            next_url: None,
            has_more: false,
        }
    }
}

enum LoadMode {
    /// First page: replace whatever records are held.
    Replace,
    /// Follow-up page: append to the existing records.
    Append,
}

/// State machine driving the infinite-scroll catalog list.
pub struct Paginator {
    fetcher: Arc<Fetcher>,
    first_page_url: Url,
    cursor: PageCursor,
    records: Vec<ItemDetail>,
    initial_attempted: bool,
    failure: Option<FetchError>,
}

impl Paginator {
    pub fn new(fetcher: Arc<Fetcher>, first_page_url: Url) -> Self {
        Self {
            fetcher,
            first_page_url,
            cursor: PageCursor::default(),
            records: Vec::new(),
            initial_attempted: false,
            failure: None,
        }
    }

    /// Records accumulated across all loaded pages, in feed order.
    pub fn records(&self) -> &[ItemDetail] {
        &self.records
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Whether the last load failed and the retry affordance should show.
    pub fn needs_retry(&self) -> bool {
        self.failure.is_some()
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.failure.as_ref()
    }

    /// Load the first page. One-shot: returns `Ok(false)` without
    /// touching the network if a load was already attempted, successful
    /// or not. Only [`retry`](Self::retry) re-arms it.
    pub async fn initial_load(&mut self, cancel: &CancelSignal) -> Result<bool, FetchError> {
        if self.initial_attempted {
            debug!("initial load already attempted, ignoring");
            return Ok(false);
        }
        self.initial_attempted = true;

        self.fetch_page(self.first_page_url.clone(), LoadMode::Replace, cancel)
            .await
            .map(|_| true)
    }

    /// Re-arm the initial load after a failure.
    pub fn retry(&mut self) {
        self.initial_attempted = false;
        self.failure = None;
    }

    /// Scroll-sentinel callback. Loads the next page unless the feed is
    /// exhausted; returns whether a load actually ran.
    pub async fn on_sentinel_visible(&mut self, cancel: &CancelSignal) -> Result<bool, FetchError> {
        if !self.cursor.has_more {
            return Ok(false);
        }
        let Some(next) = self.cursor.next_url.clone() else {
            return Ok(false);
        };

        self.fetch_page(next, LoadMode::Append, cancel).await.map(|_| true)
    }

    async fn fetch_page(
        &mut self,
        url: Url,
        mode: LoadMode,
        cancel: &CancelSignal,
    ) -> Result<(), FetchError> {
        // No state is touched until the load completes, so dropping this
        // future mid-await leaves the paginator exactly as it was.
        let result = load_page(&self.fetcher, &url, cancel).await;

        match result {
            Ok(page) => {
                self.cursor.has_more = page.next.is_some();
                self.cursor.next_url = page.next;
                match mode {
                    LoadMode::Replace => self.records = page.items,
                    LoadMode::Append => self.records.extend(page.items),
                }
                self.failure = None;
                debug!(
                    total = self.records.len(),
                    has_more = self.cursor.has_more,
                    "page loaded"
                );
                Ok(())
            }
            // Cancellation is the user navigating away, not a failure:
            // it never raises the retry affordance.
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
            Err(err) => {
                warn!(url = %url, error = %err, "page load failed");
                self.failure = Some(err.clone());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetcherConfig;
    use dexkit_common::{cancel_pair, RetryConfig};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn one_shot_fetcher() -> Arc<Fetcher> {
        Arc::new(
            Fetcher::new(FetcherConfig {
                retry: RetryConfig {
                    max_attempts: 1,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(100),
                },
                ..FetcherConfig::default()
            })
            .unwrap(),
        )
    }

    fn detail_json(id: u64, name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": name,
            "height": 4,
            "weight": 60,
            "sprites": { "front_default": null },
            "types": []
        })
    }

    async fn mount_detail(server: &MockServer, id: u64, name: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/detail/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(detail_json(id, name)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn initial_then_sentinel_walks_the_feed() {
        let server = MockServer::start().await;
        let page1 = serde_json::json!({
            "results": [{ "name": "pikachu", "url": format!("{}/detail/25", server.uri()) }],
            "next": format!("{}/list?offset=20", server.uri())
        });
        let page2 = serde_json::json!({
            "results": [{ "name": "raichu", "url": format!("{}/detail/26", server.uri()) }],
            "next": null
        });
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(query_param("offset", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page2))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page1))
            .expect(1)
            .mount(&server)
            .await;
        mount_detail(&server, 25, "pikachu").await;
        mount_detail(&server, 26, "raichu").await;

        let url = Url::parse(&format!("{}/list", server.uri())).unwrap();
        let mut paginator = Paginator::new(one_shot_fetcher(), url);

        assert!(paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap());
        assert_eq!(paginator.records().len(), 1);
        assert!(paginator.cursor().has_more);

        assert!(paginator
            .on_sentinel_visible(&CancelSignal::never())
            .await
            .unwrap());
        assert_eq!(paginator.records().len(), 2);
        assert_eq!(paginator.records()[1].name, "raichu");
        assert!(!paginator.cursor().has_more);

        // Exhausted feed: the sentinel becomes a no-op.
        assert!(!paginator
            .on_sentinel_visible(&CancelSignal::never())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn initial_load_is_one_shot() {
        let server = MockServer::start().await;
        let page = serde_json::json!({ "results": [], "next": null });
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/list", server.uri())).unwrap();
        let mut paginator = Paginator::new(one_shot_fetcher(), url);

        assert!(paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap());
        assert!(!paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn failed_initial_load_stays_latched_until_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/list", server.uri())).unwrap();
        let mut paginator = Paginator::new(one_shot_fetcher(), url);

        let err = paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status(500));
        assert!(paginator.needs_retry());

        // Still latched: no second request goes out.
        assert!(!paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap());

        paginator.retry();
        assert!(!paginator.needs_retry());
        let err = paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status(500));
    }

    #[tokio::test]
    async fn abandoned_load_leaves_paginator_usable() {
        let server = MockServer::start().await;
        let page1 = serde_json::json!({
            "results": [],
            "next": format!("{}/list?offset=20", server.uri())
        });
        let page2 = serde_json::json!({
            "results": [{ "name": "eevee", "url": format!("{}/detail/133", server.uri()) }],
            "next": null
        });
        // First follow-up request stalls; the caller gives up and drops it.
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(query_param("offset", "20"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page2.clone())
                    .set_delay(Duration::from_secs(5)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(query_param("offset", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page2))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page1))
            .mount(&server)
            .await;
        mount_detail(&server, 133, "eevee").await;

        let url = Url::parse(&format!("{}/list", server.uri())).unwrap();
        let mut paginator = Paginator::new(one_shot_fetcher(), url);
        paginator
            .initial_load(&CancelSignal::never())
            .await
            .unwrap();

        // Abandon the first follow-up load mid-flight.
        let gave_up = tokio::time::timeout(
            Duration::from_millis(100),
            paginator.on_sentinel_visible(&CancelSignal::never()),
        )
        .await;
        assert!(gave_up.is_err());

        // The paginator is untouched and the next attempt succeeds.
        assert!(paginator.cursor().has_more);
        assert!(paginator
            .on_sentinel_visible(&CancelSignal::never())
            .await
            .unwrap());
        assert_eq!(paginator.records().len(), 1);
        assert_eq!(paginator.records()[0].name, "eevee");
    }

    #[tokio::test]
    async fn cancellation_does_not_raise_retry_affordance() {
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let url = Url::parse("http://127.0.0.1:9/list").unwrap();
        let mut paginator = Paginator::new(one_shot_fetcher(), url);

        let err = paginator.initial_load(&signal).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!paginator.needs_retry());
    }
}
