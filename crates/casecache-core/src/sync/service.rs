use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::report::{QueueReport, SyncEntryFailure, SyncReport};
use crate::api::{DocumentRegistration, RemoteService};
use crate::connectivity::ConnectivityMonitor;
use crate::models::{DataUrl, PendingDocument, PendingPhoto};
use crate::queue::{DocumentQueue, PhotoQueue, ReplayQueue};

/// Replays queued documents and photos against the remote service.
pub struct SyncService {
    documents: DocumentQueue,
    photos: PhotoQueue,
    remote: Arc<dyn RemoteService>,
    reports: watch::Sender<Option<SyncReport>>,
    /// Held for the whole of a run so runs never overlap
    running: Mutex<()>,
}

impl SyncService {
    pub fn new(documents: DocumentQueue, photos: PhotoQueue, remote: Arc<dyn RemoteService>) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            documents,
            photos,
            remote,
            reports,
            running: Mutex::new(()),
        }
    }

    /// Receiver yielding the report of the most recent run.
    pub fn subscribe_reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.subscribe()
    }

    /// Drain every queue once: documents first, then photos. Synced photos
    /// are purged at the end of the run.
    ///
    /// A run started while another is in progress waits for it and then
    /// drains whatever is still pending.
    pub async fn run(&self) -> SyncReport {
        let _running = self.running.lock().await;
        let started_at = Utc::now();

        let documents = drain(&self.documents, |doc| self.replay_document(doc)).await;
        let mut photos = drain(&self.photos, |photo| self.replay_photo(photo)).await;
        match self.photos.purge_synced().await {
            Ok(purged) => photos.purged = purged,
            Err(e) => warn!(error = %e, "Could not purge synced photos"),
        }

        let report = SyncReport {
            documents,
            photos,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            synced = report.synced_count(),
            failed = report.failed_count(),
            skipped = report.documents.skipped + report.photos.skipped,
            "Sync finished: {}",
            report.summary()
        );

        self.reports.send_replace(Some(report.clone()));
        report
    }

    /// Run a sync on every offline -> online transition of `monitor`.
    ///
    /// The task ends once every clone of the monitor is dropped; callers
    /// that outlive it should abort the returned handle instead.
    pub fn spawn_on_reconnect(self: Arc<Self>, monitor: &ConnectivityMonitor) -> JoinHandle<()> {
        let mut rx = monitor.watch();
        tokio::spawn(async move {
            let mut seen = rx.borrow_and_update().reconnects;
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                if !state.online || state.reconnects == seen {
                    continue;
                }
                seen = state.reconnects;
                debug!(reconnects = seen, "Reconnected, starting sync");
                self.run().await;
            }
            debug!("Connectivity monitor dropped, reconnect sync stopped");
        })
    }

    async fn replay_document(&self, doc: PendingDocument) -> Result<(), String> {
        let remote_ref = self
            .remote
            .upload_blob(&doc.file_name, doc.content_type(), doc.file_blob.clone())
            .await
            .map_err(|e| format!("upload failed: {}", e))?;

        let registration = DocumentRegistration {
            victim_id: doc.victim_id,
            label: doc.label,
            name: doc.file_name,
            url: remote_ref.url,
        };
        self.remote
            .create_document(&registration)
            .await
            .map_err(|e| format!("document registration failed: {}", e))
    }

    async fn replay_photo(&self, photo: PendingPhoto) -> Result<(), String> {
        let data = DataUrl::parse(&photo.photo_data_url)
            .map_err(|reason| format!("unreadable photo data: {}", reason))?;
        let file_name = format!(
            "victim-{}-photo-{}.{}",
            photo.victim_id,
            photo.local_id,
            data.extension()
        );

        let remote_ref = self
            .remote
            .upload_blob(&file_name, &data.mime_type, data.bytes)
            .await
            .map_err(|e| format!("upload failed: {}", e))?;

        self.remote
            .attach_victim_photo(photo.victim_id, &remote_ref.url)
            .await
            .map_err(|e| format!("photo attach failed: {}", e))
    }
}

/// Replay every pending entry of `queue` in order. An entry is re-checked
/// immediately before its replay so one reconciled by a concurrent run is
/// skipped, and a failure never stops the entries behind it.
async fn drain<Q, F, Fut>(queue: &Q, replay: F) -> QueueReport
where
    Q: ReplayQueue,
    F: Fn(Q::Entry) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let entries = match queue.pending_all().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(queue = queue.name(), error = %e, "Could not read pending queue");
            return QueueReport::unreadable(e.to_string());
        }
    };

    let mut report = QueueReport::default();
    for entry in entries {
        let id = Q::entry_id(&entry);

        match queue.is_pending(id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(queue = queue.name(), id, "Entry already reconciled, skipping");
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                report.failures.push(SyncEntryFailure {
                    local_id: id,
                    message: e.to_string(),
                });
                continue;
            }
        }

        report.attempted += 1;
        if let Err(message) = replay(entry).await {
            warn!(queue = queue.name(), id, error = %message, "Entry not synced, will retry");
            report.failures.push(SyncEntryFailure { local_id: id, message });
            continue;
        }

        // Accepted remotely; a failed local reconcile means the entry may be
        // replayed again on the next run.
        match queue.reconcile(id).await {
            Ok(()) => report.synced += 1,
            Err(e) => {
                warn!(queue = queue.name(), id, error = %e, "Synced entry could not be reconciled locally");
                report.failures.push(SyncEntryFailure {
                    local_id: id,
                    message: format!("accepted remotely but not reconciled: {}", e),
                });
            }
        }
    }
    report
}
