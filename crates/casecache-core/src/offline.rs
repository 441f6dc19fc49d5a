//! Offline client facade.
//!
//! `OfflineClient` wires the local store, entity caches, pending-write
//! queues, dispatcher and sync service together. When the local store
//! cannot be opened the client keeps working network-only: reads go
//! straight to the network and enqueue calls fail with a queue write error.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, RemoteService};
use crate::cache::CacheManager;
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, ListenerId};
use crate::dispatcher::{
    DispatchError, DispatchState, Dispatcher, FetchOutcome, RequestOptions, RouteTable,
};
use crate::models::{NewDocument, NewPhoto};
use crate::queue::{DocumentQueue, PhotoQueue, QueueError};
use crate::store::{StoreError, StoreHandle};
use crate::sync::{QueueReport, SyncReport, SyncService};

/// A queued document as shown in a victim's pending list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PendingDocumentSummary {
    pub id: u64,
    pub label: String,
    pub name: String,
}

/// The most recent photo captured offline for a victim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct LatestPhoto {
    pub photo_data_url: String,
    pub captured_at: DateTime<Utc>,
}

/// Everything that needs the local store.
struct Storage {
    cache: CacheManager,
    documents: DocumentQueue,
    photos: PhotoQueue,
    sync: Arc<SyncService>,
}

pub struct OfflineClient {
    api: ApiClient,
    monitor: ConnectivityMonitor,
    dispatcher: Arc<Dispatcher>,
    storage: Option<Storage>,
    /// Why the store could not be opened, kept for enqueue errors
    storage_error: Option<(PathBuf, String)>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    refreshes: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineClient {
    /// Build a client against the configured API, replaying queued writes
    /// through the same API.
    pub async fn new(config: &Config, monitor: ConnectivityMonitor) -> Result<Self, ApiError> {
        let api = ApiClient::new(config)?;
        let remote: Arc<dyn RemoteService> = Arc::new(api.clone());
        Ok(Self::open(config, monitor, api, remote).await)
    }

    /// Build a client whose queued writes are replayed through `remote`
    /// instead of the API client.
    pub async fn with_remote(
        config: &Config,
        monitor: ConnectivityMonitor,
        remote: Arc<dyn RemoteService>,
    ) -> Result<Self, ApiError> {
        let api = ApiClient::new(config)?;
        Ok(Self::open(config, monitor, api, remote).await)
    }

    async fn open(
        config: &Config,
        monitor: ConnectivityMonitor,
        api: ApiClient,
        remote: Arc<dyn RemoteService>,
    ) -> Self {
        let opened = match config.data_dir() {
            Ok(dir) => StoreHandle::new(dir.clone())
                .init()
                .await
                .map_err(|e| (dir, e.to_string())),
            Err(e) => Err((PathBuf::new(), e.to_string())),
        };

        let (storage, storage_error) = match opened {
            Ok(store) => {
                let documents = DocumentQueue::new(store.clone());
                let photos = PhotoQueue::new(store.clone());
                let sync = Arc::new(SyncService::new(
                    documents.clone(),
                    photos.clone(),
                    remote,
                ));
                let storage = Storage {
                    cache: CacheManager::new(store),
                    documents,
                    photos,
                    sync,
                };
                (Some(storage), None)
            }
            Err((path, message)) => {
                warn!(
                    path = %path.display(),
                    error = %message,
                    "Local storage unavailable, running network-only"
                );
                (None, Some((path, message)))
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(
            api.clone(),
            storage.as_ref().map(|s| s.cache.clone()),
            RouteTable::default(),
            monitor.clone(),
        ));

        let reconnect_task = storage
            .as_ref()
            .map(|s| s.sync.clone().spawn_on_reconnect(&monitor));

        Self {
            api,
            monitor,
            dispatcher,
            storage,
            storage_error,
            reconnect_task: Mutex::new(reconnect_task),
            refreshes: Mutex::new(Vec::new()),
        }
    }

    /// Whether the local store is open. When false every read is
    /// network-only and nothing can be queued.
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.storage.as_ref().map(|s| &s.cache)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ===== Reads =====

    /// Dispatch a request, answering failed reads from cache.
    pub async fn fetch_with_fallback(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<FetchOutcome, DispatchError> {
        self.dispatcher.request(url, options).await
    }

    /// Read slow-changing data. A cached copy younger than `max_age` is
    /// served without touching the network; an older one is served as-is
    /// while a background request refreshes it.
    pub async fn fetch_reference(
        &self,
        url: &str,
        max_age: Duration,
    ) -> Result<FetchOutcome, DispatchError> {
        let resolved = self.api.resolve_url(url)?;
        let (cache, route) = match (self.cache(), self.dispatcher.routes().resolve(&resolved)) {
            (Some(cache), Some(route)) => (cache, route),
            _ => return self.fetch_with_fallback(url, RequestOptions::get()).await,
        };

        let cached = match cache.get_from_cache(route.store, &route.key).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return self.fetch_with_fallback(url, RequestOptions::get()).await,
            Err(e) => {
                warn!(store = %route.store, key = %route.key, error = %e, "Cached reference data unreadable");
                return self.fetch_with_fallback(url, RequestOptions::get()).await;
            }
        };

        if cached.is_older_than(max_age) {
            debug!(store = %route.store, key = %route.key, age = %cached.age_display(), "Refreshing stale reference data");
            self.spawn_refresh(url.to_string());
        }

        Ok(FetchOutcome {
            data: cached.data,
            from_cache: true,
            degraded: false,
            cached_at: Some(cached.cached_at),
        })
    }

    fn spawn_refresh(&self, url: String) {
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = dispatcher.request(&url, RequestOptions::get()).await {
                warn!(url = %url, error = %e, "Background refresh failed");
            }
        });

        let mut refreshes = lock(&self.refreshes);
        refreshes.retain(|h| !h.is_finished());
        refreshes.push(handle);
    }

    /// Current loading/error/offline state of the dispatcher.
    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatcher.state()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<DispatchState> {
        self.dispatcher.subscribe()
    }

    // ===== Pending writes =====

    fn storage(&self, kind: &'static str) -> Result<&Storage, QueueError> {
        self.storage.as_ref().ok_or_else(|| {
            let (path, message) = self
                .storage_error
                .clone()
                .unwrap_or_else(|| (PathBuf::new(), "not opened".to_string()));
            QueueError::WriteFailure {
                kind,
                source: StoreError::unavailable(path, &message),
            }
        })
    }

    pub async fn enqueue_document(&self, doc: NewDocument) -> Result<u64, QueueError> {
        self.storage("document")?.documents.enqueue(doc).await
    }

    pub async fn enqueue_photo(&self, photo: NewPhoto) -> Result<u64, QueueError> {
        self.storage("photo")?.photos.enqueue(photo).await
    }

    /// Documents still waiting for upload for a victim, newest first.
    /// Empty when local storage is unavailable.
    pub async fn list_pending_documents(
        &self,
        victim_id: i64,
    ) -> Result<Vec<PendingDocumentSummary>, QueueError> {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Ok(Vec::new()),
        };

        Ok(storage
            .documents
            .list_pending(victim_id)
            .await?
            .into_iter()
            .map(|doc| PendingDocumentSummary {
                id: doc.local_id,
                label: doc.label,
                name: doc.file_name,
            })
            .collect())
    }

    pub async fn latest_pending_photo(
        &self,
        victim_id: i64,
    ) -> Result<Option<LatestPhoto>, QueueError> {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Ok(None),
        };

        Ok(storage
            .photos
            .latest_pending(victim_id)
            .await?
            .map(|photo| LatestPhoto {
                photo_data_url: photo.photo_data_url,
                captured_at: photo.captured_at,
            }))
    }

    pub async fn delete_pending_document(&self, id: u64) -> Result<(), QueueError> {
        match &self.storage {
            Some(storage) => storage.documents.delete_by_id(id).await,
            None => Ok(()),
        }
    }

    pub async fn delete_pending_photo(&self, id: u64) -> Result<(), QueueError> {
        match &self.storage {
            Some(storage) => storage.photos.delete_by_id(id).await,
            None => Ok(()),
        }
    }

    /// Queued entries not yet synced, as `(documents, photos)`.
    pub async fn pending_counts(&self) -> Result<(usize, usize), QueueError> {
        match &self.storage {
            Some(storage) => Ok((
                storage.documents.count_pending().await?,
                storage.photos.count_pending().await?,
            )),
            None => Ok((0, 0)),
        }
    }

    // ===== Connectivity =====

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Feed a connectivity signal from the host. Going online starts a sync.
    pub fn set_online(&self, online: bool) {
        self.monitor.set_online(online);
    }

    pub fn on_connectivity_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.monitor.on_connectivity_change(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.monitor.unsubscribe(id)
    }

    /// Probe the API once and feed the result into the monitor.
    pub async fn check_connectivity(&self) -> bool {
        let online = self.api.is_reachable().await;
        self.monitor.set_online(online);
        online
    }

    // ===== Sync =====

    /// Drain the pending queues now. Waits for a reconnect sync already in
    /// progress instead of replaying the same entries alongside it.
    pub async fn sync_now(&self) -> SyncReport {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => {
                let now = Utc::now();
                let message = "local storage unavailable".to_string();
                return SyncReport {
                    documents: QueueReport::unreadable(message.clone()),
                    photos: QueueReport::unreadable(message),
                    started_at: now,
                    finished_at: now,
                };
            }
        };

        storage.sync.run().await
    }

    /// Receiver for reports of every sync run, including reconnect runs.
    pub fn subscribe_sync_reports(
        &self,
    ) -> Option<tokio::sync::watch::Receiver<Option<SyncReport>>> {
        self.storage.as_ref().map(|s| s.sync.subscribe_reports())
    }

    /// Stop the reconnect task and wait for background cache writes.
    pub async fn shutdown(&self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }

        let refreshes = std::mem::take(&mut *lock(&self.refreshes));
        for result in futures::future::join_all(refreshes).await {
            if let Err(e) = result {
                error!(error = %e, "Background refresh task panicked");
            }
        }

        self.dispatcher.settle().await;
        info!("Offline client shut down");
    }
}

impl Drop for OfflineClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, data_dir: PathBuf) -> Config {
        Config {
            base_url: format!("{}/api", server.uri()),
            data_dir: Some(data_dir),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_unavailable_storage_degrades_to_network_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/victime"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let client = OfflineClient::new(&config(&server, blocker), ConnectivityMonitor::new(true))
            .await
            .unwrap();
        assert!(!client.has_storage());

        let outcome = client
            .fetch_with_fallback("/victime", RequestOptions::get())
            .await
            .unwrap();
        assert_eq!(outcome.data, json!([{"id": 1}]));

        let err = client
            .enqueue_photo(NewPhoto::from_image_bytes(1, "image/png", &[1]))
            .await
            .unwrap_err();
        match err {
            QueueError::WriteFailure { source, .. } => assert!(source.is_unavailable()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(client.list_pending_documents(1).await.unwrap().is_empty());
        assert!(!client.sync_now().await.is_clean());
    }

    #[tokio::test]
    async fn test_pending_document_summaries() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let client = OfflineClient::new(
            &config(&server, dir.path().to_path_buf()),
            ConnectivityMonitor::new(false),
        )
        .await
        .unwrap();

        let id = client
            .enqueue_document(NewDocument {
                victim_id: 4,
                label: "Plainte".to_string(),
                file_name: "plainte.pdf".to_string(),
                bytes: vec![1, 2, 3],
                mime_type: Some("application/pdf".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(
            client.list_pending_documents(4).await.unwrap(),
            vec![PendingDocumentSummary {
                id,
                label: "Plainte".to_string(),
                name: "plainte.pdf".to_string(),
            }]
        );
        assert!(client.list_pending_documents(5).await.unwrap().is_empty());

        client.delete_pending_document(id).await.unwrap();
        client.delete_pending_document(id).await.unwrap();
        assert_eq!(client.pending_counts().await.unwrap(), (0, 0));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_latest_pending_photo() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let client = OfflineClient::new(
            &config(&server, dir.path().to_path_buf()),
            ConnectivityMonitor::new(false),
        )
        .await
        .unwrap();

        assert!(client.latest_pending_photo(2).await.unwrap().is_none());
        client
            .enqueue_photo(NewPhoto::from_image_bytes(2, "image/jpeg", &[1]))
            .await
            .unwrap();
        let newest = NewPhoto::from_image_bytes(2, "image/jpeg", &[2]);
        let newest_url = newest.data_url.clone();
        client.enqueue_photo(newest).await.unwrap();

        let latest = client.latest_pending_photo(2).await.unwrap().unwrap();
        assert_eq!(latest.photo_data_url, newest_url);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_reference_serves_fresh_cache_without_network() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let client = OfflineClient::new(
            &config(&server, dir.path().to_path_buf()),
            ConnectivityMonitor::new(true),
        )
        .await
        .unwrap();

        let cache = client.cache().unwrap();
        cache
            .save_to_cache(
                crate::store::StoreName::ReferenceData,
                "/api/reference/countries",
                &json!(["FR", "BE"]),
                None,
            )
            .await
            .unwrap();

        let outcome = client
            .fetch_reference("/reference/countries", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(outcome.data, json!(["FR", "BE"]));
        assert!(outcome.from_cache);
        assert!(!outcome.degraded);
        assert!(server.received_requests().await.unwrap().is_empty());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_reference_refreshes_stale_cache_in_background() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/reference/countries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["FR", "BE", "LU"])))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = OfflineClient::new(
            &config(&server, dir.path().to_path_buf()),
            ConnectivityMonitor::new(true),
        )
        .await
        .unwrap();
        let cache = client.cache().unwrap().clone();
        cache
            .save_to_cache(
                crate::store::StoreName::ReferenceData,
                "/api/reference/countries",
                &json!(["FR"]),
                None,
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let outcome = client
            .fetch_reference("/reference/countries", Duration::milliseconds(5))
            .await
            .unwrap();
        assert_eq!(outcome.data, json!(["FR"]));

        client.shutdown().await;
        let refreshed = cache
            .get_from_cache(crate::store::StoreName::ReferenceData, "/api/reference/countries")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.data, json!(["FR", "BE", "LU"]));
    }
}
