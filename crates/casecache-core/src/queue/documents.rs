use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{QueueError, ReplayQueue};
use crate::models::{NewDocument, PendingDocument, StoredRecord};
use crate::store::{LocalStore, StoreName};

const STORE: StoreName = StoreName::PendingDocuments;

/// Documents queued for upload. Entries are deleted once synced.
#[derive(Clone)]
pub struct DocumentQueue {
    store: Arc<LocalStore>,
}

impl DocumentQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Persist a document and return its local id.
    pub async fn enqueue(&self, doc: NewDocument) -> Result<u64, QueueError> {
        if doc.file_name.trim().is_empty() {
            return Err(QueueError::InvalidPayload {
                kind: "document",
                reason: "file name is empty".to_string(),
            });
        }

        let victim_id = doc.victim_id;
        let size = doc.bytes.len();
        let id = self
            .store
            .add(STORE, |id| StoredRecord::Document(doc.into_pending(id)))
            .await
            .map_err(|source| QueueError::WriteFailure {
                kind: "document",
                source,
            })?;

        info!(id, victim_id, bytes = size, "Queued document for upload");
        Ok(id)
    }

    async fn all(&self) -> Result<Vec<PendingDocument>, QueueError> {
        Ok(self
            .store
            .get_all(STORE)
            .await?
            .into_iter()
            .filter_map(StoredRecord::into_document)
            .filter(|doc| !doc.synced)
            .collect())
    }

    /// Unsynced documents of one victim, newest first.
    pub async fn list_pending(&self, victim_id: i64) -> Result<Vec<PendingDocument>, QueueError> {
        let mut docs: Vec<PendingDocument> = self
            .all()
            .await?
            .into_iter()
            .filter(|doc| doc.victim_id == victim_id)
            .collect();
        docs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.local_id.cmp(&a.local_id))
        });
        Ok(docs)
    }

    pub async fn get(&self, id: u64) -> Result<Option<PendingDocument>, QueueError> {
        Ok(self
            .store
            .get(STORE, id)
            .await?
            .and_then(StoredRecord::into_document))
    }

    pub async fn count_pending(&self) -> Result<usize, QueueError> {
        Ok(self.all().await?.len())
    }

    /// Remove a queued document, whether cancelled by the user or synced.
    /// Unknown ids are ignored.
    pub async fn delete_by_id(&self, id: u64) -> Result<(), QueueError> {
        self.store.delete(STORE, id).await?;
        debug!(id, "Removed pending document");
        Ok(())
    }
}

#[async_trait]
impl ReplayQueue for DocumentQueue {
    type Entry = PendingDocument;

    fn name(&self) -> &'static str {
        "documents"
    }

    fn entry_id(entry: &PendingDocument) -> u64 {
        entry.local_id
    }

    async fn pending_all(&self) -> Result<Vec<PendingDocument>, QueueError> {
        let mut docs = self.all().await?;
        docs.sort_by_key(|doc| doc.local_id);
        Ok(docs)
    }

    async fn is_pending(&self, id: u64) -> Result<bool, QueueError> {
        Ok(self.get(id).await?.is_some_and(|doc| !doc.synced))
    }

    async fn reconcile(&self, id: u64) -> Result<(), QueueError> {
        self.delete_by_id(id).await
    }
}
