//! Dexwave Smoke Harness
//!
//! Drives the worker stack end to end with a scripted network: install
//! precaching, activation purge, cache-first fetching, the offline
//! fallback paths, push delivery, user messaging, and a deferred sync
//! run. Prints a JSON result line and exits non-zero on any failed
//! check.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dexkit_bridge::{handle_user_message, BridgePayload, ClientRegistry, UserMessage};
use dexkit_common::logging::{init_logging, LogConfig};
use dexkit_push::{handle_push, MemoryNotificationCenter};
use dexkit_sw::testing::ScriptedNetwork;
use dexkit_sw::{FetchRequest, FetchResponse, SwError, SyncTag, WorkerConfig, WorkerState};
use dexkit_sync::{SyncConfig, SyncScheduler};
use serde_json::json;
use tracing::{error, info};
use url::Url;

/// Parse command line arguments.
struct Args {
    /// Emit JSON logs instead of pretty output.
    log_json: bool,
    /// Explicit log filter spec (e.g. "dexkit_sw=debug").
    log_filter: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut log_json = false;
        let mut log_filter = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--log-json" => {
                    log_json = true;
                }
                "--log-filter" => {
                    log_filter = args.next();
                }
                _ => {}
            }
        }

        Self {
            log_json,
            log_filter,
        }
    }

    fn log_config(&self) -> LogConfig {
        let config = if self.log_json {
            LogConfig::production()
        } else {
            LogConfig::default()
        };
        match self.log_filter {
            Some(ref filter) => config.with_filter(filter.clone()),
            None => config,
        }
    }
}

/// Phase timing collector for the result summary.
struct PhaseTiming {
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseTiming {
    fn new() -> Self {
        Self { phases: Vec::new() }
    }

    fn record(&mut self, phase: &'static str, duration: Duration) {
        self.phases.push((phase, duration));
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (phase, duration) in &self.phases {
            let ms = (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
            summary.insert(phase.to_string(), json!(ms));
        }
        serde_json::Value::Object(summary)
    }
}

/// Records failed checks without aborting the run.
struct Checks {
    failures: Vec<String>,
    passed: u32,
}

impl Checks {
    fn new() -> Self {
        Self {
            failures: Vec::new(),
            passed: 0,
        }
    }

    fn check(&mut self, name: &str, ok: bool) {
        if ok {
            self.passed += 1;
        } else {
            error!(check = name, "smoke check failed");
            self.failures.push(name.to_string());
        }
    }
}

fn list_body(origin: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "count": 2,
        "results": [
            { "name": "bulbasaur", "url": format!("{origin}/api/v2/pokemon/1/") },
            { "name": "ivysaur", "url": format!("{origin}/api/v2/pokemon/2/") }
        ],
        "next": null
    }))
    .unwrap_or_default()
}

fn detail_body(id: u64, name: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "name": name,
        "height": 7,
        "weight": 69,
        "sprites": { "front_default": null },
        "types": []
    }))
    .unwrap_or_default()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_config());

    let start = Instant::now();
    let mut timing = PhaseTiming::new();
    let mut checks = Checks::new();

    let network = Arc::new(ScriptedNetwork::new());
    let config = WorkerConfig {
        precache: vec![
            Url::parse("https://app.example/").expect("precache url"),
            Url::parse("https://app.example/index.html").expect("precache url"),
        ],
        ..WorkerConfig::default()
    };
    let state = Arc::new(WorkerState::new(config, network.clone()));
    let clients = Arc::new(ClientRegistry::new());

    info!("starting Dexwave smoke harness");

    // Phase 1: install precaches the shell.
    let phase = Instant::now();
    network.push_ok(FetchResponse::ok_with_body(b"<html>shell</html>".to_vec()));
    network.push_ok(FetchResponse::ok_with_body(b"<html>shell</html>".to_vec()));
    let stored = state.install().await;
    checks.check("install_precaches_shell", stored == 2);
    timing.record("install", phase.elapsed());

    // Phase 2: activation purges the previous generation.
    let phase = Instant::now();
    {
        let mut caches = state.caches().write().await;
        caches.open("api-responses-v0");
    }
    let purged = state.activate().await;
    checks.check(
        "activate_purges_stale_buckets",
        purged == vec!["api-responses-v0".to_string()],
    );
    timing.record("activate", phase.elapsed());

    // Phase 3: cache-first fetch, network miss then cache hit.
    let phase = Instant::now();
    let list_url = Url::parse("https://pokeapi.co/api/v2/pokemon?limit=20").expect("list url");
    network.push_ok(FetchResponse::ok_with_body(list_body(
        "https://pokeapi.co",
    )));
    let first = state.handle_fetch(FetchRequest::get(list_url.clone())).await;
    checks.check(
        "first_fetch_comes_from_network",
        matches!(&first, Ok(r) if !r.from_cache && r.status == 200),
    );
    let second = state.handle_fetch(FetchRequest::get(list_url.clone())).await;
    checks.check(
        "second_fetch_comes_from_cache",
        matches!(&second, Ok(r) if r.from_cache),
    );
    timing.record("cache_first_fetch", phase.elapsed());

    // Phase 4: offline catalog failure arms the sync task.
    let phase = Instant::now();
    let detail_url = Url::parse("https://pokeapi.co/api/v2/pokemon/151/").expect("detail url");
    network.push_err(SwError::Network("offline".to_string()));
    let offline = state.handle_fetch(FetchRequest::get(detail_url)).await;
    checks.check("offline_catalog_fetch_fails", offline.is_err());
    checks.check(
        "offline_failure_arms_sync",
        state.sync_registry().is_pending(SyncTag::CatalogSync),
    );
    timing.record("offline_api", phase.elapsed());

    // Phase 5: offline navigation serves the precached shell.
    let phase = Instant::now();
    network.push_err(SwError::Network("offline".to_string()));
    let nav_url = Url::parse("https://app.example/detail/25").expect("nav url");
    let nav = state.handle_fetch(FetchRequest::navigation(nav_url)).await;
    checks.check(
        "offline_navigation_serves_shell",
        matches!(&nav, Ok(r) if r.from_cache && r.body == b"<html>shell</html>".to_vec()),
    );
    timing.record("offline_navigation", phase.elapsed());

    // Phase 6: a client connects and receives a push notification.
    let phase = Instant::now();
    let client_url = Url::parse("https://app.example/").expect("client url");
    let (_client_id, mut rx) = clients.connect(client_url).await;
    let center = MemoryNotificationCenter::new();
    let push = handle_push(
        r#"{"title":"Dexwave","body":"New catalog entries!"}"#,
        &clients,
        &center,
    )
    .await;
    checks.check("push_parses_payload", matches!(&push, Ok(p) if p.title == "Dexwave"));
    checks.check("push_shows_notification", center.shown().len() == 1);
    let relayed = rx.try_recv();
    checks.check(
        "push_relayed_to_client",
        matches!(
            &relayed,
            Ok(m) if matches!(m.payload, BridgePayload::PushNotificationReceived { .. })
        ),
    );
    timing.record("push", phase.elapsed());

    // Phase 7: a user message acknowledges and the client hears it.
    let phase = Instant::now();
    let ack = handle_user_message(
        UserMessage::new("when does the sync run?"),
        &clients,
        state.sync_registry(),
    )
    .await;
    checks.check(
        "user_message_acknowledged",
        matches!(ack.payload, BridgePayload::UserMessageResponse { .. }),
    );
    checks.check(
        "user_message_response_broadcast",
        matches!(
            rx.try_recv(),
            Ok(m) if matches!(m.payload, BridgePayload::UserMessageResponse { .. })
        ),
    );
    timing.record("user_message", phase.elapsed());

    // Phase 8: the deferred sync runs, refreshes the catalog, and
    // reports completion over the bridge.
    let phase = Instant::now();
    network.push_ok(FetchResponse::ok_with_body(list_body(
        "https://pokeapi.co",
    )));
    network.push_ok(FetchResponse::ok_with_body(detail_body(1, "bulbasaur")));
    network.push_ok(FetchResponse::ok_with_body(detail_body(2, "ivysaur")));

    let scheduler = SyncScheduler::new(
        state.clone(),
        clients.clone(),
        SyncConfig::new(list_url),
    );
    let outcomes = scheduler.run_due().await;
    checks.check(
        "sync_run_updates_details",
        matches!(
            outcomes.as_slice(),
            [(SyncTag::CatalogSync, Ok(report))] if report.details_updated == 2
        ),
    );
    checks.check("sync_registry_drained", state.sync_registry().is_empty());
    checks.check(
        "sync_completion_broadcast",
        matches!(
            rx.try_recv(),
            Ok(m) if matches!(m.payload, BridgePayload::SyncComplete { .. })
        ),
    );
    timing.record("sync_run", phase.elapsed());

    let status = if checks.failures.is_empty() {
        "pass"
    } else {
        "fail"
    };
    let result = json!({
        "status": status,
        "checks_passed": checks.passed,
        "checks_failed": checks.failures,
        "elapsed_ms": start.elapsed().as_millis(),
        "phases_ms": timing.summary(),
    });
    println!("{}", result);

    if !checks.failures.is_empty() {
        std::process::exit(1);
    }
}
