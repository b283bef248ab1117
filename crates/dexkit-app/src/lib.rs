//! # Dexkit App
//!
//! Application-side networking and UI state for the Dexwave catalog.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Dexkit App                         │
//! ├─────────────────────────────────────────────────────────┤
//! │  Fetcher          │  Retrying HTTP client (reqwest)     │
//! │  load_page        │  Catalog page + detail fan-out      │
//! │  Paginator        │  Infinite-scroll list state         │
//! │  ToastStore       │  Transient notification toasts      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`Fetcher`] wraps a `reqwest::Client` with squared-backoff retry
//! and cooperative cancellation. [`load_page`] fetches one catalog page
//! and fans out to its item details with fail-fast semantics: the page
//! is rendered whole or not at all. [`Paginator`] and [`ToastStore`]
//! hold the list and toast state machines.

use dexkit_common::{join_all_or_fail, CancelSignal, RetryConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

pub mod paginate;
pub mod toast;

pub use paginate::{PageCursor, Paginator};
pub use toast::{Toast, ToastStore, TOAST_TTL};

// ==================== Error Types ====================

/// Errors from application-side fetching.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Server answered with a non-success status. Retryable.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Transport-level failure (DNS, connect, timeout). Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// The response body did not parse as the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The caller cancelled the request. Terminal.
    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this error came from cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

// ==================== Fetcher ====================

/// Configuration for the retrying [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string sent with every request.
    pub user_agent: String,
    /// Per-request transport timeout.
    pub timeout: Duration,
    /// Retry schedule applied across attempts.
    pub retry: RetryConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "Dexwave/1.0".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// HTTP fetcher with squared-backoff retry and cancellation.
///
/// HTTP error statuses and transport failures both count as retryable;
/// cancellation short-circuits immediately, including mid-backoff.
/// When all attempts are spent the last error is returned as-is.
pub struct Fetcher {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl Fetcher {
    /// Create a fetcher from the given configuration.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    /// GET a URL, retrying failed attempts on a squared-backoff schedule.
    ///
    /// Attempt `k` is followed by a delay of `k² × base_delay`, capped at
    /// `max_delay`. Cancellation is checked before each attempt, raced
    /// against the request itself, and raced against each backoff sleep.
    pub async fn fetch_with_retry(
        &self,
        url: &Url,
        cancel: &CancelSignal,
    ) -> Result<reqwest::Response, FetchError> {
        let mut last_error = FetchError::Network("no attempts made".to_string());

        for attempt in 1..=self.retry.max_attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.client.get(url.clone()).send() => outcome,
            };

            match outcome {
                Ok(response) if response.status().is_success() => {
                    if attempt > 1 {
                        debug!(url = %url, attempt, "fetch succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(url = %url, status, attempt, "fetch returned error status");
                    last_error = FetchError::Status(status);
                }
                Err(err) => {
                    warn!(url = %url, attempt, error = %err, "fetch failed");
                    last_error = FetchError::Network(err.to_string());
                }
            }

            let delay = self.retry.delay_after_attempt(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
        }

        Err(last_error)
    }

    /// GET a URL and deserialize the JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        cancel: &CancelSignal,
    ) -> Result<T, FetchError> {
        let response = self.fetch_with_retry(url, cancel).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

// ==================== Catalog Wire Types ====================

/// One page of the catalog listing endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogPage {
    /// Items on this page, in listing order.
    pub results: Vec<CatalogItem>,
    /// URL of the next page, absent on the last page.
    pub next: Option<Url>,
}

/// A single listing entry pointing at its detail resource.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogItem {
    pub name: String,
    pub url: Url,
}

/// Full detail record for one catalog item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ItemDetail {
    pub id: u64,
    pub name: String,
    pub height: u32,
    pub weight: u32,
    #[serde(default)]
    pub sprites: Sprites,
    #[serde(default)]
    pub types: Vec<TypeSlot>,
}

/// Sprite URLs for an item. Only the front-facing default is rendered.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Sprites {
    #[serde(default)]
    pub front_default: Option<String>,
}

/// One slot in an item's type list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TypeSlot {
    pub slot: u32,
    #[serde(rename = "type")]
    pub kind: NamedResource,
}

/// A named reference to another API resource.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamedResource {
    pub name: String,
    pub url: String,
}

// ==================== Page Loading ====================

/// A fully hydrated catalog page ready to render.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub items: Vec<ItemDetail>,
    pub next: Option<Url>,
}

/// Fetch a catalog page and hydrate every item's detail record.
///
/// Detail fetches run concurrently and fail fast: if any detail fetch
/// fails, the whole page load fails with that error so the list never
/// renders a page with holes in it. All in-flight siblings observe the
/// shared cancel signal.
pub async fn load_page(
    fetcher: &Fetcher,
    url: &Url,
    cancel: &CancelSignal,
) -> Result<LoadedPage, FetchError> {
    let page: CatalogPage = fetcher.fetch_json(url, cancel).await?;
    debug!(url = %url, items = page.results.len(), "catalog page fetched");

    let items = join_all_or_fail(
        page.results
            .iter()
            .map(|item| fetcher.fetch_json::<ItemDetail>(&item.url, cancel)),
    )
    .await?;

    Ok(LoadedPage {
        items,
        next: page.next,
    })
}

// ==================== Tests ====================
