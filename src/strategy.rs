//! Caching strategies
//!
//! The executor runs the algorithm bound to a request class against the active
//! generations of one version:
//!
//! - **cache-first** for static assets, navigations and everything else
//! - **network-first** for API calls
//! - **pass-through** for non-GET requests
//!
//! Every failure is converted into a fallback or a synthesized response here;
//! nothing below this boundary reaches the caller as an error. Writes into the
//! dynamic generation run as tracked tasks so callers can await them with
//! [`PendingWrites::settle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use reqwest::Method;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheKind, CacheStore, CachedEntry, GenerationName, RequestKey};
use crate::classify::RequestClass;
use crate::fetch::Fetcher;
use crate::http::{AbortSignal, Destination, Request, Response};
use crate::retry::RetryQueue;
use crate::version::VersionToken;

/// Header marking a synthesized fallback response
pub const FALLBACK_HEADER: &str = "x-cachewarden-fallback";

/// Header marking a response served from a generation
pub const CACHE_HEADER: &str = "x-cachewarden-cache";

/// Synthesized response for a request that could not be served offline
pub fn offline_response(class: RequestClass) -> Response {
    let response = match class {
        RequestClass::Api => Response::new(503, r#"{"error":"offline","status":503}"#)
            .with_header("content-type", "application/json"),
        _ => Response::new(503, "Service Unavailable: offline")
            .with_header("content-type", "text/plain; charset=utf-8"),
    };
    response.with_header(FALLBACK_HEADER, "offline")
}

/// Synthesized response for a request whose URL cannot be resolved
pub fn invalid_request_response(reason: &str) -> Response {
    Response::new(400, format!("Bad Request: {}", reason))
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_header(FALLBACK_HEADER, "invalid-request")
}

/// Tracks in-flight cache writes
#[derive(Debug, Default, Clone)]
pub struct PendingWrites {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PendingWrites {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Number of writes not yet known to be finished
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|task| !task.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until every tracked write, including ones started meanwhile, has finished
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.lock());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    warn!(error = %err, "cache write task failed");
                }
            }
        }
    }
}

/// Stops a superseded executor from writing into generations that are being deleted
///
/// The fence is shared by every executor in a scope, the retired flag belongs
/// to one executor. Cache writes hold the fence for reading and re-check the
/// flag under it; activation holds it exclusively while it deletes old
/// generations and retires the previous executor.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    fence: Arc<RwLock<()>>,
    retired: Arc<AtomicBool>,
}

impl WriteGate {
    /// Gate for one executor, sharing `fence` with the rest of its scope
    pub fn new(fence: Arc<RwLock<()>>) -> Self {
        Self {
            fence,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Skips every later write through this gate
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Returns true if both gates belong to the same executor
    pub fn same_gate(&self, other: &WriteGate) -> bool {
        Arc::ptr_eq(&self.retired, &other.retired)
    }

    /// Waits for in-flight writes in the scope and blocks new ones until dropped
    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.fence).write_owned().await
    }
}

/// Runs caching strategies against one version's generations
pub struct StrategyExecutor {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    retry: Arc<RetryQueue>,
    static_generation: String,
    dynamic_generation: String,
    offline_document: RequestKey,
    api_fallback_max_age: Option<chrono::Duration>,
    pending: PendingWrites,
    gate: WriteGate,
}

impl StrategyExecutor {
    /// Creates an executor bound to `token`'s generations
    ///
    /// `offline_document` is the cache-busted URL served when a navigation fails.
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        retry: Arc<RetryQueue>,
        token: &VersionToken,
        offline_document: impl Into<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            retry,
            static_generation: GenerationName::new(CacheKind::Static, token).to_string(),
            dynamic_generation: GenerationName::new(CacheKind::Dynamic, token).to_string(),
            offline_document: RequestKey::get(offline_document),
            api_fallback_max_age: None,
            pending: PendingWrites::default(),
            gate: WriteGate::default(),
        }
    }

    /// Routes cache writes through `gate`
    pub fn with_write_gate(mut self, gate: WriteGate) -> Self {
        self.gate = gate;
        self
    }

    /// Limits how old an API entry may be to serve as offline fallback
    pub fn with_api_fallback_max_age(mut self, max_age: Option<chrono::Duration>) -> Self {
        self.api_fallback_max_age = max_age;
        self
    }

    /// Handle to the executor's in-flight cache writes
    pub fn pending_writes(&self) -> PendingWrites {
        self.pending.clone()
    }

    /// Runs the strategy bound to `class` for a cache-busted GET request
    pub async fn execute(&self, request: Request, class: RequestClass) -> Response {
        match class {
            RequestClass::Api => self.network_first(request).await,
            RequestClass::Static | RequestClass::Navigation | RequestClass::Other => {
                self.cache_first(request, class).await
            }
        }
    }

    /// Serves from the generations, going to the network only on a miss
    pub async fn cache_first(&self, request: Request, class: RequestClass) -> Response {
        let key = RequestKey::get(request.url.clone());
        if let Some(entry) = self.lookup(&key, &[&self.static_generation, &self.dynamic_generation]).await {
            debug!(url = %key.url, "cache hit");
            return served_from_cache(&entry);
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if response.is_success() {
                    self.populate(key, &response, request.abort.clone());
                }
                response
            }
            Err(err) => {
                warn!(url = %key.url, error = %err, "network failed on cache miss");
                if request.destination == Destination::Document {
                    if let Some(document) = self
                        .lookup(
                            &self.offline_document,
                            &[&self.static_generation, &self.dynamic_generation],
                        )
                        .await
                    {
                        debug!(url = %key.url, "serving offline document");
                        return served_from_cache(&document);
                    }
                }
                offline_response(class)
            }
        }
    }

    /// Always tries the network; falls back to the last stored response at the same key
    pub async fn network_first(&self, request: Request) -> Response {
        let key = RequestKey::get(request.url.clone());
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if response.is_success() {
                    self.populate(key, &response, request.abort.clone());
                }
                response
            }
            Err(err) => {
                warn!(url = %key.url, error = %err, "network failed, trying cached API response");
                match self
                    .lookup(&key, &[&self.dynamic_generation, &self.static_generation])
                    .await
                {
                    Some(entry) if self.is_fresh_enough(&entry) => served_from_cache(&entry),
                    Some(_) => {
                        debug!(url = %key.url, "cached API response too old for fallback");
                        offline_response(RequestClass::Api)
                    }
                    None => offline_response(RequestClass::Api),
                }
            }
        }
    }

    /// Sends a request straight to the network without touching the generations
    ///
    /// Mutating requests that fail to reach the network are parked for replay.
    pub async fn pass_through(&self, request: Request) -> Response {
        match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(method = %request.method, url = %request.url, error = %err, "pass-through failed");
                if request.method != Method::GET {
                    self.retry.enqueue(request);
                }
                offline_response(RequestClass::Other)
            }
        }
    }

    fn is_fresh_enough(&self, entry: &CachedEntry) -> bool {
        match self.api_fallback_max_age {
            Some(max_age) => Utc::now() - entry.inserted_at <= max_age,
            None => true,
        }
    }

    /// Looks the key up in each generation in order; read failures count as misses
    async fn lookup(&self, key: &RequestKey, generations: &[&String]) -> Option<CachedEntry> {
        for generation in generations {
            match self.store.get(generation.as_str(), key).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(err) => {
                    warn!(generation = %generation, url = %key.url, error = %err, "cache read failed");
                }
            }
        }
        None
    }

    /// Stores a copy of a live response in the dynamic generation
    fn populate(&self, key: RequestKey, response: &Response, abort: Option<AbortSignal>) {
        if abort.as_ref().is_some_and(AbortSignal::is_aborted) {
            debug!(url = %key.url, "request aborted, skipping cache write");
            return;
        }
        if self.gate.is_retired() {
            debug!(url = %key.url, "version retired, skipping cache write");
            return;
        }

        let entry = CachedEntry::from_response(key, response);
        let store = Arc::clone(&self.store);
        let generation = self.dynamic_generation.clone();
        let gate = self.gate.clone();
        let handle = tokio::spawn(async move {
            if abort.as_ref().is_some_and(AbortSignal::is_aborted) {
                debug!(url = %entry.key.url, "request aborted, skipping cache write");
                return;
            }
            let _fence = gate.fence.read().await;
            if gate.is_retired() {
                debug!(url = %entry.key.url, "version retired, skipping cache write");
                return;
            }
            let url = entry.key.url.clone();
            match store.put(&generation, entry).await {
                Ok(()) => debug!(generation = %generation, url = %url, "cached response"),
                Err(err) => warn!(generation = %generation, url = %url, error = %err, "cache write failed"),
            }
        });
        self.pending.track(handle);
    }
}

fn served_from_cache(entry: &CachedEntry) -> Response {
    entry.to_response().with_header(CACHE_HEADER, "hit")
}
