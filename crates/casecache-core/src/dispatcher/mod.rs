//! Network-aware fetch dispatcher.
//!
//! Every remote read or write from the collaborator goes through
//! `Dispatcher::request`:
//!
//! - GETs that succeed are written through into the matching cache store.
//!   The write is a detached task: its failure is logged and never fails
//!   the read.
//! - GETs that fail (network error or non-2xx) are answered from that cache
//!   when it holds entries, flagged `from_cache` and `degraded`.
//! - Mutating requests are never answered from cache; their failures always
//!   reach the caller.
//!
//! There is no retry loop; callers retry by calling again.

pub mod routes;

pub use routes::{CacheRoute, KeyPolicy, PathPattern, ResolvedRoute, RouteTable};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::api::{ApiClient, ApiError};
use crate::cache::CacheManager;
use crate::connectivity::{ConnectivityMonitor, ListenerId};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl DispatchError {
    pub fn api(&self) -> &ApiError {
        match self {
            DispatchError::Api(e) => e,
        }
    }
}

/// Method, body and headers of a request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::with_method(Method::GET, None)
    }

    pub fn post(body: Value) -> Self {
        Self::with_method(Method::POST, Some(body))
    }

    pub fn put(body: Value) -> Self {
        Self::with_method(Method::PUT, Some(body))
    }

    pub fn patch(body: Value) -> Self {
        Self::with_method(Method::PATCH, Some(body))
    }

    pub fn delete() -> Self {
        Self::with_method(Method::DELETE, None)
    }

    fn with_method(method: Method, body: Option<Value>) -> Self {
        Self {
            method,
            body,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Only plain reads may be written through or answered from cache.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET
    }
}

/// Result of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub data: Value,
    /// Served from the local cache rather than a network response
    pub from_cache: bool,
    /// The network read failed and `data` is the last cached copy
    pub degraded: bool,
    /// When the served copy was cached, for "offline data from ..." notices
    pub cached_at: Option<DateTime<Utc>>,
}

impl FetchOutcome {
    fn fresh(data: Value) -> Self {
        Self {
            data,
            from_cache: false,
            degraded: false,
            cached_at: None,
        }
    }
}

/// Phase of the most recent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPhase {
    #[default]
    Idle,
    Loading,
    Success,
    SuccessFromCache,
    Failure,
}

/// Reactive state published to subscribers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchState {
    pub loading: bool,
    pub error: Option<String>,
    pub is_offline: bool,
    pub phase: RequestPhase,
}

pub struct Dispatcher {
    api: ApiClient,
    cache: Option<CacheManager>,
    routes: RouteTable,
    monitor: ConnectivityMonitor,
    state: Arc<watch::Sender<DispatchState>>,
    listener: ListenerId,
    in_flight: AtomicUsize,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// `cache` is `None` when local storage is unavailable; the dispatcher
    /// then runs network-only.
    pub fn new(
        api: ApiClient,
        cache: Option<CacheManager>,
        routes: RouteTable,
        monitor: ConnectivityMonitor,
    ) -> Self {
        let (state, _) = watch::channel(DispatchState {
            is_offline: !monitor.is_online(),
            ..DispatchState::default()
        });
        let state = Arc::new(state);

        let publisher = state.clone();
        let listener = monitor.on_connectivity_change(move |online| {
            publisher.send_if_modified(|state| {
                let changed = state.is_offline == online;
                state.is_offline = !online;
                changed
            });
        });

        Self {
            api,
            cache,
            routes,
            monitor,
            state,
            listener,
            in_flight: AtomicUsize::new(0),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Subscribe to loading/error/offline state. The offline flag is
    /// re-read from the monitor at subscription time.
    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        let online = self.monitor.is_online();
        self.state.send_if_modified(|state| {
            let changed = state.is_offline == online;
            state.is_offline = !online;
            changed
        });
        self.state.subscribe()
    }

    pub fn state(&self) -> DispatchState {
        self.state.borrow().clone()
    }

    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<FetchOutcome, DispatchError> {
        self.begin();
        let outcome = self.dispatch(url, options).await;
        self.finish(&outcome);
        outcome
    }

    async fn dispatch(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<FetchOutcome, DispatchError> {
        let url = self.api.resolve_url(url)?;
        let route = if options.is_read() {
            self.routes.resolve(&url)
        } else {
            None
        };

        match self
            .api
            .execute(options.method.clone(), &url, options.body.as_ref(), &options.headers)
            .await
        {
            Ok(data) => {
                if let Some(route) = route {
                    self.write_through(route, data.clone());
                }
                Ok(FetchOutcome::fresh(data))
            }
            Err(err) => match route {
                Some(route) if err.allows_cache_fallback() => self.fallback(&route, err).await,
                _ => Err(err.into()),
            },
        }
    }

    /// Serve a failed read from cache, or return the original failure.
    async fn fallback(
        &self,
        route: &ResolvedRoute,
        err: ApiError,
    ) -> Result<FetchOutcome, DispatchError> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return Err(err.into()),
        };

        match cache.get_record(route.store, &route.key).await {
            Ok(Some(record)) if record.has_entries() => {
                warn!(
                    store = %route.store,
                    key = %route.key,
                    error = %err,
                    "Network read failed, serving cached data"
                );
                Ok(FetchOutcome {
                    data: record.payload,
                    from_cache: true,
                    degraded: true,
                    cached_at: Some(record.stored_at),
                })
            }
            Ok(_) => {
                debug!(store = %route.store, key = %route.key, "No cached fallback available");
                Err(err.into())
            }
            Err(cache_err) => {
                warn!(store = %route.store, key = %route.key, error = %cache_err, "Cache fallback read failed");
                Err(err.into())
            }
        }
    }

    /// Detached cache update for a successful read.
    fn write_through(&self, route: ResolvedRoute, data: Value) {
        let cache = match &self.cache {
            Some(cache) => cache.clone(),
            None => return,
        };

        let handle = tokio::spawn(async move {
            match cache.save_to_cache(route.store, &route.key, &data, None).await {
                Ok(()) => debug!(store = %route.store, key = %route.key, "Cache refreshed"),
                Err(e) => {
                    error!(store = %route.store, key = %route.key, error = %e, "Write-through cache update failed")
                }
            }
        });

        let mut pending = self.lock_pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every write-through task started so far.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.lock_pending());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Write-through task panicked");
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|state| {
            state.loading = true;
            state.phase = RequestPhase::Loading;
        });
    }

    fn finish(&self, outcome: &Result<FetchOutcome, DispatchError>) {
        let still_loading = self.in_flight.fetch_sub(1, Ordering::SeqCst) > 1;
        self.state.send_modify(|state| {
            state.loading = still_loading;
            match outcome {
                Ok(fetched) => {
                    state.error = None;
                    state.phase = if fetched.degraded {
                        RequestPhase::SuccessFromCache
                    } else {
                        RequestPhase::Success
                    };
                }
                Err(e) => {
                    state.error = Some(e.to_string());
                    state.phase = RequestPhase::Failure;
                }
            }
        });
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.monitor.unsubscribe(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::manager::VICTIMS_KEY;
    use crate::config::Config;
    use crate::store::{StoreHandle, StoreName};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn dispatcher(base_url: &str, dir: &TempDir) -> (Dispatcher, CacheManager) {
        let config = Config {
            base_url: base_url.to_string(),
            ..Config::default()
        };
        let store = StoreHandle::new(dir.path().to_path_buf()).init().await.unwrap();
        let cache = CacheManager::new(store);
        let dispatcher = Dispatcher::new(
            ApiClient::new(&config).unwrap(),
            Some(cache.clone()),
            RouteTable::default(),
            ConnectivityMonitor::new(true),
        );
        (dispatcher, cache)
    }

    #[tokio::test]
    async fn test_successful_get_writes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/victime"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (dispatcher, cache) = dispatcher(&server.uri(), &dir).await;

        let outcome = dispatcher.request("/victime", RequestOptions::get()).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(dispatcher.state().phase, RequestPhase::Success);

        dispatcher.settle().await;
        let cached = cache.get_from_cache(StoreName::Victims, VICTIMS_KEY).await.unwrap().unwrap();
        assert_eq!(cached.data, json!([{"id": 1}]));
    }

    #[tokio::test]
    async fn test_rejected_get_falls_back_to_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (dispatcher, cache) = dispatcher(&server.uri(), &dir).await;
        cache
            .save_to_cache(StoreName::Victims, VICTIMS_KEY, &json!([{"id": 7}]), None)
            .await
            .unwrap();

        let outcome = dispatcher.request("/victime", RequestOptions::get()).await.unwrap();
        assert!(outcome.from_cache);
        assert!(outcome.degraded);
        assert!(outcome.cached_at.is_some());
        assert_eq!(outcome.data, json!([{"id": 7}]));
        assert_eq!(dispatcher.state().phase, RequestPhase::SuccessFromCache);
    }

    #[tokio::test]
    async fn test_empty_cache_does_not_mask_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (dispatcher, cache) = dispatcher(&server.uri(), &dir).await;
        cache
            .save_to_cache(StoreName::Victims, VICTIMS_KEY, &json!([]), None)
            .await
            .unwrap();

        let err = dispatcher.request("/victime", RequestOptions::get()).await.unwrap_err();
        assert_eq!(err.api().status(), Some(500));
        let state = dispatcher.state();
        assert_eq!(state.phase, RequestPhase::Failure);
        assert!(state.error.is_some());
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_unrouted_get_has_no_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (dispatcher, _cache) = dispatcher(&server.uri(), &dir).await;
        assert!(dispatcher.request("/auth/me", RequestOptions::get()).await.is_err());
    }

    #[tokio::test]
    async fn test_mutations_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/victime"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 99})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (dispatcher, cache) = dispatcher(&server.uri(), &dir).await;

        let outcome = dispatcher
            .request("/victime", RequestOptions::post(json!({"nom": "X"})))
            .await
            .unwrap();
        assert_eq!(outcome.data, json!({"id": 99}));

        dispatcher.settle().await;
        assert!(cache.get_from_cache(StoreName::Victims, VICTIMS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_only_without_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 1})))
            .mount(&server)
            .await;

        let config = Config {
            base_url: server.uri(),
            ..Config::default()
        };
        let dispatcher = Dispatcher::new(
            ApiClient::new(&config).unwrap(),
            None,
            RouteTable::default(),
            ConnectivityMonitor::new(true),
        );
        assert!(!dispatcher.has_cache());
        let outcome = dispatcher.request("/victime/stats", RequestOptions::get()).await.unwrap();
        assert_eq!(outcome.data, json!({"n": 1}));
        dispatcher.settle().await;
    }

    #[tokio::test]
    async fn test_offline_flag_follows_monitor() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let store = StoreHandle::new(dir.path().to_path_buf()).init().await.unwrap();
        let monitor = ConnectivityMonitor::new(true);
        let dispatcher = Dispatcher::new(
            ApiClient::new(&config).unwrap(),
            Some(CacheManager::new(store)),
            RouteTable::default(),
            monitor.clone(),
        );

        let rx = dispatcher.subscribe();
        assert!(!rx.borrow().is_offline);

        monitor.set_online(false);
        assert!(rx.borrow().is_offline);
        assert!(dispatcher.state().is_offline);

        drop(dispatcher);
        monitor.set_online(true);
    }
}
