//! # Dexkit Sync Scheduler
//!
//! Deferred background refresh of catalog data.
//!
//! Tasks are armed by tag in the worker's [`dexkit_sw::SyncRegistry`] --
//! either by the fetch interceptor when a catalog request fails, or by a user
//! message containing "sync" -- and run here when the host gives the worker
//! time.
//!
//! - `catalog-sync`: fetch the first catalog page, store it, then fetch a
//!   bounded batch of detail records with best-effort aggregation, and
//!   broadcast `SYNC_COMPLETE` to every open instance.
//! - `catalog-refresh`: the forced-invalidate variant; deletes all stored
//!   catalog entries before re-running the sync.
//!
//! Total failure (the first page fetch) is handled twice on purpose: a local
//! re-arm after a fixed delay, and an `Err` returned upward so the host
//! scheduler can apply its own backoff.

use std::sync::Arc;
use std::time::Duration;

use dexkit_bridge::{BridgeMessage, BridgePayload, ClientRegistry};
use dexkit_common::{join_all_settled, with_timeout};
use dexkit_sw::{BucketKind, FetchRequest, SyncTag, WorkerState};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};
use url::Url;

// ==================== Errors ====================

/// Sync failures. Only a first-page failure aborts a run; detail failures
/// are aggregated into the report.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

// ==================== Config ====================

/// Sync scheduler configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// First catalog page fetched by every sync run.
    pub catalog_list_url: Url,
    /// Upper bound on detail records fetched per run.
    pub detail_limit: usize,
    /// Delay before a failed run re-arms its own tag.
    pub retry_delay: Duration,
    /// Per-detail fetch timeout.
    pub detail_timeout: Duration,
}

impl SyncConfig {
    pub fn new(catalog_list_url: Url) -> Self {
        Self {
            catalog_list_url,
            detail_limit: 10,
            retry_delay: Duration::from_secs(30),
            detail_timeout: Duration::from_secs(10),
        }
    }
}

// ==================== Wire types ====================

#[derive(Debug, Deserialize)]
struct CatalogListing {
    results: Vec<CatalogRef>,
}

#[derive(Debug, Deserialize)]
struct CatalogRef {
    name: String,
    url: String,
}

// ==================== Scheduler ====================

/// Outcome of a completed sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub details_updated: usize,
    pub details_failed: usize,
}

/// Runs deferred catalog sync tasks against the worker state.
pub struct SyncScheduler {
    state: Arc<WorkerState>,
    clients: Arc<ClientRegistry>,
    config: SyncConfig,
}

impl SyncScheduler {
    pub fn new(state: Arc<WorkerState>, clients: Arc<ClientRegistry>, config: SyncConfig) -> Self {
        Self {
            state,
            clients,
            config,
        }
    }

    /// Drain every pending tag and run each in registration order.
    pub async fn run_due(&self) -> Vec<(SyncTag, Result<SyncReport, SyncError>)> {
        let tags = self.state.sync_registry().drain();
        let mut outcomes = Vec::with_capacity(tags.len());
        for tag in tags {
            let outcome = self.run(tag).await;
            outcomes.push((tag, outcome));
        }
        outcomes
    }

    /// Run a single task. On total failure the tag re-arms itself after
    /// [`SyncConfig::retry_delay`] and the error still propagates upward.
    pub async fn run(&self, tag: SyncTag) -> Result<SyncReport, SyncError> {
        info!(tag = tag.as_str(), "sync run starting");
        let result = match tag {
            SyncTag::CatalogSync => self.run_sync().await,
            SyncTag::CatalogRefresh => self.run_refresh().await,
        };

        if let Err(ref err) = result {
            error!(tag = tag.as_str(), error = %err, "sync run failed, re-arming");
            self.rearm(tag);
        }
        result
    }

    fn rearm(&self, tag: SyncTag) {
        let registry = Arc::clone(self.state.sync_registry());
        let delay = self.config.retry_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            registry.register(tag);
        });
    }

    async fn run_sync(&self) -> Result<SyncReport, SyncError> {
        let request = FetchRequest::get(self.config.catalog_list_url.clone());
        let response = self
            .state
            .network()
            .fetch(&request)
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if response.status != 200 {
            return Err(SyncError::Status(response.status));
        }

        if let Err(err) = self
            .state
            .store_response(BucketKind::Api, &request, &response)
            .await
        {
            warn!(error = %err, "catalog page store failed");
        }

        let listing: CatalogListing = response.json().map_err(|e| SyncError::Parse(e.to_string()))?;

        // Bounded fan-out, best-effort: one bad detail never aborts the batch.
        let fetches = listing
            .results
            .iter()
            .take(self.config.detail_limit)
            .map(|item| self.fetch_and_store_detail(&item.name, &item.url));
        let settled = join_all_settled(fetches).await;

        for err in &settled.errors {
            warn!(error = %err, "detail sync failed");
        }

        let report = SyncReport {
            details_updated: settled.ok.len(),
            details_failed: settled.errors.len(),
        };

        let message = BridgeMessage::new(BridgePayload::SyncComplete {
            data: serde_json::json!({
                "updated": report.details_updated,
                "failed": report.details_failed,
            }),
        });
        self.clients.publish(&message).await;

        info!(
            updated = report.details_updated,
            failed = report.details_failed,
            "sync run complete"
        );
        Ok(report)
    }

    async fn run_refresh(&self) -> Result<SyncReport, SyncError> {
        let purged = self.state.purge_catalog_entries().await;
        info!(purged, "catalog entries invalidated before refresh");
        self.run_sync().await
    }

    async fn fetch_and_store_detail(&self, name: &str, url: &str) -> Result<(), SyncError> {
        let url = Url::parse(url)
            .map_err(|e| SyncError::Parse(format!("detail url for {name}: {e}")))?;
        let request = FetchRequest::get(url);

        let response = with_timeout(self.config.detail_timeout, || {
            self.state.network().fetch(&request)
        })
        .await
        .map_err(|e| SyncError::Network(e.to_string()))?
        .map_err(|e| SyncError::Network(e.to_string()))?;

        if response.status != 200 {
            return Err(SyncError::Status(response.status));
        }

        if let Err(err) = self
            .state
            .store_response(BucketKind::Api, &request, &response)
            .await
        {
            // Storage trouble is not a sync failure; the data was fetched.
            warn!(name, error = %err, "detail store failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexkit_sw::testing::ScriptedNetwork;
    use dexkit_sw::{FetchResponse, SwError, WorkerConfig};

    fn listing_body(count: usize) -> Vec<u8> {
        let results: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "name": format!("mon-{i}"),
                    "url": format!("https://pokeapi.co/api/v2/pokemon/{}/", i + 1),
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "results": results,
            "next": null,
        }))
        .unwrap()
    }

    fn scheduler() -> (Arc<ScriptedNetwork>, Arc<ClientRegistry>, SyncScheduler) {
        let network = Arc::new(ScriptedNetwork::new());
        let state = Arc::new(WorkerState::new(WorkerConfig::default(), network.clone()));
        let clients = Arc::new(ClientRegistry::new());
        let config =
            SyncConfig::new(Url::parse("https://pokeapi.co/api/v2/pokemon?limit=20").unwrap());
        let scheduler = SyncScheduler::new(state, clients.clone(), config);
        (network, clients, scheduler)
    }

    #[tokio::test]
    async fn test_sync_stores_page_and_details() {
        let (network, clients, scheduler) = scheduler();
        let app = Url::parse("https://app.example/").unwrap();
        let (_id, mut rx) = clients.connect(app).await;

        network.push_ok(FetchResponse::ok_with_body(listing_body(2)));
        network.push_ok(FetchResponse::ok_with_body(b"{\"id\":1}".to_vec()));
        network.push_ok(FetchResponse::ok_with_body(b"{\"id\":2}".to_vec()));

        let report = scheduler.run(SyncTag::CatalogSync).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                details_updated: 2,
                details_failed: 0
            }
        );

        // Page + both details landed in the API bucket.
        let caches = scheduler.state.caches().read().await;
        assert_eq!(caches.bucket("api-responses-v1").unwrap().len(), 3);
        drop(caches);

        // Every open instance heard about completion.
        let message = rx.recv().await.unwrap();
        match message.payload {
            BridgePayload::SyncComplete { data } => assert_eq!(data["updated"], 2),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_detail_failure_is_best_effort() {
        let (network, clients, scheduler) = scheduler();
        let (_id, mut rx) = clients
            .connect(Url::parse("https://app.example/").unwrap())
            .await;

        network.push_ok(FetchResponse::ok_with_body(listing_body(3)));
        network.push_ok(FetchResponse::ok_with_body(b"{\"id\":1}".to_vec()));
        network.push_err(SwError::Network("flaky".to_string()));
        network.push_ok(FetchResponse::ok_with_body(b"{\"id\":3}".to_vec()));

        let report = scheduler.run(SyncTag::CatalogSync).await.unwrap();
        assert_eq!(report.details_updated, 2);
        assert_eq!(report.details_failed, 1);

        // Completion still broadcast despite the partial failure.
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            BridgePayload::SyncComplete { .. }
        ));
    }

    #[tokio::test]
    async fn test_detail_limit_bounds_fanout() {
        let (network, _clients, scheduler) = scheduler();

        network.push_ok(FetchResponse::ok_with_body(listing_body(25)));
        for i in 0..10 {
            network.push_ok(FetchResponse::ok_with_body(
                format!("{{\"id\":{i}}}").into_bytes(),
            ));
        }

        let report = scheduler.run(SyncTag::CatalogSync).await.unwrap();
        assert_eq!(report.details_updated, 10);
        // 1 page + 10 details, never 25.
        assert_eq!(network.calls(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_rearms_and_propagates() {
        let (network, _clients, scheduler) = scheduler();
        network.push_err(SwError::Network("offline".to_string()));

        let result = scheduler.run(SyncTag::CatalogSync).await;
        assert!(matches!(result, Err(SyncError::Network(_))));

        // Not yet re-armed...
        let registry = Arc::clone(scheduler.state.sync_registry());
        assert!(!registry.is_pending(SyncTag::CatalogSync));

        // ...but it is after the fixed retry delay.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.is_pending(SyncTag::CatalogSync));
    }

    #[tokio::test]
    async fn test_refresh_purges_before_sync() {
        let (network, _clients, scheduler) = scheduler();

        // Seed a stale catalog entry.
        let stale_url = Url::parse("https://pokeapi.co/api/v2/pokemon/999/").unwrap();
        let stale_request = FetchRequest::get(stale_url);
        scheduler
            .state
            .store_response(
                BucketKind::Api,
                &stale_request,
                &FetchResponse::ok_with_body(b"stale".to_vec()),
            )
            .await
            .unwrap();

        network.push_ok(FetchResponse::ok_with_body(listing_body(1)));
        network.push_ok(FetchResponse::ok_with_body(b"{\"id\":1}".to_vec()));

        scheduler.run(SyncTag::CatalogRefresh).await.unwrap();

        let caches = scheduler.state.caches().read().await;
        let bucket = caches.bucket("api-responses-v1").unwrap();
        // Stale entry is gone; only the fresh page + detail remain.
        assert_eq!(bucket.len(), 2);
        assert!(bucket.match_url("https://pokeapi.co/api/v2/pokemon/999/").is_none());
    }

    #[tokio::test]
    async fn test_run_due_drains_registry() {
        let (network, _clients, scheduler) = scheduler();
        scheduler.state.sync_registry().register(SyncTag::CatalogSync);

        network.push_ok(FetchResponse::ok_with_body(listing_body(0)));

        let outcomes = scheduler.run_due().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_ok());
        assert!(scheduler.state.sync_registry().is_empty());
    }
}
