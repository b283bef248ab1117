//! # Dexkit Service Worker Core
//!
//! The background interception worker for the Dexwave catalog client.
//!
//! ## Features
//!
//! - **Cache buckets**: named, versioned stores for static assets, the app
//!   shell, and API responses
//! - **Resource classifier**: pure URL -> bucket-policy mapping
//! - **Fetch interception**: cache-first-then-network with offline fallback
//! - **Lifecycle**: install precaching, activation purge of stale generations
//! - **Sync registry**: idempotent deferred-task tags armed on catalog failures
//!
//! ## Architecture
//!
//! ```text
//! WorkerState
//!     ├── Classifier          url -> {api | static | shell | none}
//!     ├── CacheStorage
//!     │       ├── static-assets-<v>
//!     │       ├── app-shell-<v>
//!     │       └── api-responses-<v>
//!     ├── dyn Network         the worker's only route to the wire
//!     └── SyncRegistry        "catalog-sync" / "catalog-refresh" tags
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Config ====================

/// Configuration for the interception worker.
///
/// Owned by [`WorkerState`]; nothing in this crate reads ambient globals.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Version suffix applied to every bucket name. Buckets with any other
    /// suffix are purged on activation.
    pub version: String,

    /// Host of the catalog API; requests to it classify as `Api`.
    pub catalog_host: String,

    /// Path prefix for bundled assets; requests under it classify as `Static`.
    pub assets_prefix: String,

    /// Paths served by the app shell (document entry points).
    pub shell_paths: Vec<String>,

    /// URLs precached into the shell bucket on install.
    pub precache: Vec<Url>,

    /// Per-bucket byte budget; writes that would exceed it fail with
    /// [`SwError::Cache`].
    pub max_bucket_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            catalog_host: "pokeapi.co".to_string(),
            assets_prefix: "/assets/".to_string(),
            shell_paths: vec!["/".to_string(), "/index.html".to_string()],
            precache: Vec::new(),
            max_bucket_bytes: 8 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    /// Versioned name for a bucket kind.
    pub fn bucket_name(&self, kind: BucketKind) -> String {
        format!("{}-{}", kind.base_name(), self.version)
    }

    /// The complete current-generation name set.
    pub fn bucket_names(&self) -> Vec<String> {
        BucketKind::ALL
            .iter()
            .map(|kind| self.bucket_name(*kind))
            .collect()
    }
}

// ==================== Classification ====================

/// The three bucket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    Static,
    Shell,
    Api,
}

impl BucketKind {
    pub const ALL: [BucketKind; 3] = [BucketKind::Static, BucketKind::Shell, BucketKind::Api];

    /// Unversioned bucket base name.
    pub fn base_name(&self) -> &'static str {
        match self {
            BucketKind::Static => "static-assets",
            BucketKind::Shell => "app-shell",
            BucketKind::Api => "api-responses",
        }
    }
}

/// Classification of a request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Api,
    Static,
    Shell,
    None,
}

impl ResourceClass {
    /// The bucket this class stores into, if any.
    pub fn bucket(&self) -> Option<BucketKind> {
        match self {
            ResourceClass::Api => Some(BucketKind::Api),
            ResourceClass::Static => Some(BucketKind::Static),
            ResourceClass::Shell => Some(BucketKind::Shell),
            ResourceClass::None => None,
        }
    }
}

/// File extensions treated as static assets.
const STATIC_EXTENSIONS: [&str; 11] = [
    "js", "css", "svg", "png", "jpg", "jpeg", "gif", "webp", "ico", "woff", "woff2",
];

/// Pure, total URL classifier. Rules evaluate in order: catalog host, asset
/// prefix / static extension, shell path, bypass.
#[derive(Debug, Clone)]
pub struct Classifier {
    catalog_host: String,
    assets_prefix: String,
    shell_paths: Vec<String>,
}

impl Classifier {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            catalog_host: config.catalog_host.clone(),
            assets_prefix: config.assets_prefix.clone(),
            shell_paths: config.shell_paths.clone(),
        }
    }

    /// Classify a URL. Deterministic, no side effects.
    pub fn classify(&self, url: &Url) -> ResourceClass {
        if url.host_str() == Some(self.catalog_host.as_str()) {
            return ResourceClass::Api;
        }

        let path = url.path();
        if path.starts_with(&self.assets_prefix) || has_static_extension(path) {
            return ResourceClass::Static;
        }

        if self.shell_paths.iter().any(|p| p == path) {
            return ResourceClass::Shell;
        }

        ResourceClass::None
    }
}

fn has_static_extension(path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) => STATIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

// ==================== Fetch types ====================

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// True when the request loads a document.
    pub is_navigation: bool,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
            is_navigation: false,
        }
    }

    /// Create a navigation (document) request.
    pub fn navigation(url: Url) -> Self {
        Self {
            is_navigation: true,
            ..Self::get(url)
        }
    }

    /// Create a request with an explicit method.
    pub fn with_method(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            ..Self::get(url)
        }
    }

    /// Normalized cache key: method + URL.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// A response flowing back to the intercepted caller.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Whether this response was served from a cache bucket.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a 200 response with a body.
    pub fn ok_with_body(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// Create a response with the given status and empty body.
    pub fn with_status(status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            from_cache: false,
        }
    }

    /// Synthesized offline fallback.
    pub fn service_unavailable() -> Self {
        let mut response = Self::with_status(503, "Service Unavailable");
        response.body = b"offline".to_vec();
        response
    }

    /// Rehydrate a response from a stored entry.
    pub fn from_entry(entry: &CachedEntry) -> Self {
        Self {
            status: entry.status,
            status_text: "OK".to_string(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Snapshot this response for storage.
    pub fn to_entry(&self, request: &FetchRequest) -> CachedEntry {
        CachedEntry {
            url: request.url.to_string(),
            method: request.method.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            cached_at: now_ms(),
        }
    }

    /// Check for a 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, SwError> {
        serde_json::from_slice(&self.body).map_err(|e| SwError::Decode(e.to_string()))
    }
}

// ==================== Cache ====================

/// A stored response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Capture time, ms since epoch.
    pub cached_at: u64,
}

impl CachedEntry {
    fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// A named bucket of cached entries with a byte budget.
#[derive(Debug)]
pub struct CacheBucket {
    pub name: String,
    entries: HashMap<String, CachedEntry>,
    total_bytes: usize,
    max_bytes: usize,
}

impl CacheBucket {
    pub fn new(name: &str, max_bytes: usize) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Match a stored entry for a request.
    pub fn match_request(&self, request: &FetchRequest) -> Option<&CachedEntry> {
        self.entries.get(&request.cache_key())
    }

    /// Match a stored GET entry by URL.
    pub fn match_url(&self, url: &str) -> Option<&CachedEntry> {
        self.entries.get(&format!("GET {}", url))
    }

    /// Store an entry, replacing any previous one for the same key.
    pub fn put(&mut self, entry: CachedEntry) -> Result<(), SwError> {
        let key = entry.key();
        let incoming = entry.body.len();
        let replaced = self.entries.get(&key).map(|e| e.body.len()).unwrap_or(0);

        let projected = self.total_bytes - replaced + incoming;
        if projected > self.max_bytes {
            return Err(SwError::Cache(format!(
                "bucket {} over budget: {} > {} bytes",
                self.name, projected, self.max_bytes
            )));
        }

        self.entries.insert(key, entry);
        self.total_bytes = projected;
        Ok(())
    }

    /// Delete a GET entry by URL.
    pub fn delete(&mut self, url: &str) -> bool {
        match self.entries.remove(&format!("GET {}", url)) {
            Some(removed) => {
                self.total_bytes -= removed.body.len();
                true
            }
            None => false,
        }
    }

    /// Delete every entry whose URL has the given host. Returns the count.
    pub fn delete_host_entries(&mut self, host: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            Url::parse(&entry.url)
                .map(|u| u.host_str() != Some(host))
                .unwrap_or(true)
        });
        self.total_bytes = self.entries.values().map(|e| e.body.len()).sum();
        before - self.entries.len()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.values().map(|e| e.url.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The full set of named buckets.
#[derive(Debug)]
pub struct CacheStorage {
    caches: HashMap<String, CacheBucket>,
    max_bucket_bytes: usize,
}

impl CacheStorage {
    pub fn new(max_bucket_bytes: usize) -> Self {
        Self {
            caches: HashMap::new(),
            max_bucket_bytes,
        }
    }

    /// Open a bucket, creating it if absent.
    pub fn open(&mut self, name: &str) -> &mut CacheBucket {
        let max_bytes = self.max_bucket_bytes;
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| CacheBucket::new(name, max_bytes))
    }

    pub fn bucket(&self, name: &str) -> Option<&CacheBucket> {
        self.caches.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    /// Match a request across every bucket.
    pub fn match_request(&self, request: &FetchRequest) -> Option<&CachedEntry> {
        self.caches
            .values()
            .find_map(|cache| cache.match_request(request))
    }
}

// ==================== Network seam ====================

/// The worker's only route to the real network.
///
/// `Err` means transport failure (offline, timeout, DNS, abort); HTTP error
/// statuses come back as `Ok` responses.
pub trait Network: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> BoxFuture<'static, Result<FetchResponse, SwError>>;
}

// ==================== Sync registry ====================

/// Deferred-task tags understood by the sync scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
    CatalogSync,
    CatalogRefresh,
}

impl SyncTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::CatalogSync => "catalog-sync",
            SyncTag::CatalogRefresh => "catalog-refresh",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "catalog-sync" => Some(SyncTag::CatalogSync),
            "catalog-refresh" => Some(SyncTag::CatalogRefresh),
            _ => None,
        }
    }
}

/// Pending deferred-task registrations. At most one per tag; re-registering a
/// pending tag is a no-op.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    pending: Mutex<Vec<SyncTag>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Returns false when it was already pending.
    pub fn register(&self, tag: SyncTag) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains(&tag) {
            debug!(tag = tag.as_str(), "sync tag already pending");
            return false;
        }
        info!(tag = tag.as_str(), "sync tag registered");
        pending.push(tag);
        true
    }

    pub fn is_pending(&self, tag: SyncTag) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&tag)
    }

    /// Remove a single pending tag. Returns whether it was pending.
    pub fn take(&self, tag: SyncTag) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        pending.retain(|t| *t != tag);
        pending.len() != before
    }

    /// Drain every pending tag, in registration order.
    pub fn drain(&self) -> Vec<SyncTag> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ==================== Worker State ====================

/// Explicit state owned by the worker process, constructed once at startup
/// and passed into every handler.
pub struct WorkerState {
    config: WorkerConfig,
    classifier: Classifier,
    caches: RwLock<CacheStorage>,
    network: Arc<dyn Network>,
    sync: Arc<SyncRegistry>,
}

impl WorkerState {
    pub fn new(config: WorkerConfig, network: Arc<dyn Network>) -> Self {
        let classifier = Classifier::new(&config);
        let caches = RwLock::new(CacheStorage::new(config.max_bucket_bytes));
        Self {
            config,
            classifier,
            caches,
            network,
            sync: Arc::new(SyncRegistry::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn caches(&self) -> &RwLock<CacheStorage> {
        &self.caches
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn sync_registry(&self) -> &Arc<SyncRegistry> {
        &self.sync
    }

    /// Install: precache the configured shell URLs. Best effort; individual
    /// failures are logged and skipped. Returns the number stored.
    pub async fn install(&self) -> usize {
        let shell_bucket = self.config.bucket_name(BucketKind::Shell);
        let mut stored = 0;

        for url in self.config.precache.clone() {
            let request = FetchRequest::get(url.clone());
            match self.network.fetch(&request).await {
                Ok(response) if response.status == 200 => {
                    let entry = response.to_entry(&request);
                    let mut caches = self.caches.write().await;
                    match caches.open(&shell_bucket).put(entry) {
                        Ok(()) => stored += 1,
                        Err(err) => warn!(url = %url, error = %err, "precache store failed"),
                    }
                }
                Ok(response) => {
                    warn!(url = %url, status = response.status, "precache fetch not OK");
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "precache fetch failed");
                }
            }
        }

        info!(stored, bucket = %shell_bucket, "install complete");
        stored
    }

    /// Activate: purge every bucket whose name is not in the current
    /// generation. Returns the purged names.
    pub async fn activate(&self) -> Vec<String> {
        let current = self.config.bucket_names();
        let mut caches = self.caches.write().await;

        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| !current.contains(name))
            .collect();

        for name in &stale {
            caches.delete(name);
            info!(bucket = %name, "stale bucket purged");
        }

        // Current-generation buckets exist after activation even when empty.
        for name in &current {
            caches.open(name);
        }

        stale
    }

    /// Store a successful response snapshot into the bucket for its kind.
    pub async fn store_response(
        &self,
        kind: BucketKind,
        request: &FetchRequest,
        response: &FetchResponse,
    ) -> Result<(), SwError> {
        let name = self.config.bucket_name(kind);
        let entry = response.to_entry(request);
        let mut caches = self.caches.write().await;
        caches.open(&name).put(entry)
    }

    /// Delete every API-bucket entry for the catalog host. Returns the count.
    pub async fn purge_catalog_entries(&self) -> usize {
        let name = self.config.bucket_name(BucketKind::Api);
        let host = self.config.catalog_host.clone();
        let mut caches = self.caches.write().await;
        caches.open(&name).delete_host_entries(&host)
    }

    /// The cache-first fetch state machine.
    ///
    /// Non-GET requests bypass interception entirely. For GETs: cache lookup,
    /// then network; 200 responses are stored by classification (store
    /// failures never fail the caller); network failures arm the sync task
    /// for catalog requests and fall back to the shell for navigations.
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchResponse, SwError> {
        if !request.is_get() {
            return self.network.fetch(&request).await;
        }

        // Lookup
        {
            let caches = self.caches.read().await;
            if let Some(entry) = caches.match_request(&request) {
                debug!(url = %request.url, "cache hit");
                return Ok(FetchResponse::from_entry(entry));
            }
        }

        // NetworkFetch
        match self.network.fetch(&request).await {
            Ok(response) if response.status == 200 => {
                // Store
                let class = self.classifier.classify(&request.url);
                if let Some(kind) = class.bucket() {
                    if let Err(err) = self.store_response(kind, &request, &response).await {
                        warn!(url = %request.url, error = %err, "cache store failed");
                    }
                }
                Ok(response)
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "pass-through error status");
                Ok(response)
            }
            Err(err) => self.fallback(&request, err).await,
        }
    }

    /// Fallback path for transport failures.
    async fn fallback(
        &self,
        request: &FetchRequest,
        err: SwError,
    ) -> Result<FetchResponse, SwError> {
        warn!(url = %request.url, error = %err, "network fetch failed");

        if self.classifier.classify(&request.url) == ResourceClass::Api {
            self.sync.register(SyncTag::CatalogSync);
        }

        if request.is_navigation {
            let shell_bucket = self.config.bucket_name(BucketKind::Shell);
            let caches = self.caches.read().await;
            if let Some(bucket) = caches.bucket(&shell_bucket) {
                for path in &self.config.shell_paths {
                    if let Ok(shell_url) = request.url.join(path) {
                        if let Some(entry) = bucket.match_url(shell_url.as_str()) {
                            info!(url = %request.url, "serving shell fallback");
                            return Ok(FetchResponse::from_entry(entry));
                        }
                    }
                }
            }
            info!(url = %request.url, "no shell entry, synthesizing 503");
            return Ok(FetchResponse::service_unavailable());
        }

        Err(err)
    }
}

// ==================== Helpers ====================

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// Used by integration tests and the smoke harness as well.
#[doc(hidden)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted in-memory network: pops queued outcomes and counts calls.
    pub struct ScriptedNetwork {
        outcomes: Mutex<VecDeque<Result<FetchResponse, SwError>>>,
        calls: AtomicU32,
    }

    impl ScriptedNetwork {
        pub fn new() -> Self {
            Self {
                outcomes: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn push_ok(&self, response: FetchResponse) {
            self.outcomes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(Ok(response));
        }

        pub fn push_err(&self, err: SwError) {
            self.outcomes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(Err(err));
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Default for ScriptedNetwork {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Network for ScriptedNetwork {
        fn fetch(
            &self,
            request: &FetchRequest,
        ) -> BoxFuture<'static, Result<FetchResponse, SwError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| {
                    Err(SwError::Network(format!(
                        "no scripted outcome for {}",
                        request.url
                    )))
                });
            Box::pin(async move { outcome })
        }
    }
}
