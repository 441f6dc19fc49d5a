use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{QueueError, ReplayQueue};
use crate::models::{DataUrl, NewPhoto, PendingPhoto, StoredRecord};
use crate::store::{LocalStore, StoreName};

const STORE: StoreName = StoreName::PendingPhotos;

/// Photos queued for upload. Entries are marked synced rather than deleted;
/// `purge_synced` clears them out.
#[derive(Clone)]
pub struct PhotoQueue {
    store: Arc<LocalStore>,
}

impl PhotoQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Persist a captured photo and return its local id.
    ///
    /// The data URL is decoded once up front so that an entry that could
    /// never be uploaded is refused instead of queued.
    pub async fn enqueue(&self, photo: NewPhoto) -> Result<u64, QueueError> {
        DataUrl::parse(&photo.data_url).map_err(|reason| QueueError::InvalidPayload {
            kind: "photo",
            reason,
        })?;

        let victim_id = photo.victim_id;
        let id = self
            .store
            .add(STORE, |id| StoredRecord::Photo(photo.into_pending(id)))
            .await
            .map_err(|source| QueueError::WriteFailure {
                kind: "photo",
                source,
            })?;

        info!(id, victim_id, "Queued photo for upload");
        Ok(id)
    }

    async fn all(&self) -> Result<Vec<PendingPhoto>, QueueError> {
        Ok(self
            .store
            .get_all(STORE)
            .await?
            .into_iter()
            .filter_map(StoredRecord::into_photo)
            .collect())
    }

    /// Unsynced photos of one victim, most recent capture first.
    pub async fn list_pending(&self, victim_id: i64) -> Result<Vec<PendingPhoto>, QueueError> {
        let mut photos: Vec<PendingPhoto> = self
            .all()
            .await?
            .into_iter()
            .filter(|photo| photo.victim_id == victim_id && !photo.synced)
            .collect();
        photos.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then(b.local_id.cmp(&a.local_id))
        });
        Ok(photos)
    }

    /// Most recent unsynced capture for a victim.
    pub async fn latest_pending(&self, victim_id: i64) -> Result<Option<PendingPhoto>, QueueError> {
        Ok(self.list_pending(victim_id).await?.into_iter().next())
    }

    pub async fn get(&self, id: u64) -> Result<Option<PendingPhoto>, QueueError> {
        Ok(self.store.get(STORE, id).await?.and_then(StoredRecord::into_photo))
    }

    pub async fn count_pending(&self) -> Result<usize, QueueError> {
        Ok(self.all().await?.iter().filter(|photo| !photo.synced).count())
    }

    /// Remove a queued photo. Unknown ids are ignored.
    pub async fn delete_by_id(&self, id: u64) -> Result<(), QueueError> {
        self.store.delete(STORE, id).await?;
        debug!(id, "Removed pending photo");
        Ok(())
    }

    /// Flag a photo as accepted by the remote service. Missing or already
    /// synced ids are left alone.
    pub async fn mark_synced(&self, id: u64) -> Result<(), QueueError> {
        match self.get(id).await? {
            Some(mut photo) if !photo.synced => {
                photo.synced = true;
                self.store.put(STORE, id, &StoredRecord::Photo(photo)).await?;
                debug!(id, "Marked photo synced");
            }
            _ => {}
        }
        Ok(())
    }

    /// Delete every photo already marked synced. Returns how many went.
    pub async fn purge_synced(&self) -> Result<usize, QueueError> {
        let mut purged = 0;
        for photo in self.all().await?.into_iter().filter(|photo| photo.synced) {
            self.store.delete(STORE, photo.local_id).await?;
            purged += 1;
        }
        if purged > 0 {
            debug!(purged, "Purged synced photos");
        }
        Ok(purged)
    }
}

#[async_trait]
impl ReplayQueue for PhotoQueue {
    type Entry = PendingPhoto;

    fn name(&self) -> &'static str {
        "photos"
    }

    fn entry_id(entry: &PendingPhoto) -> u64 {
        entry.local_id
    }

    async fn pending_all(&self) -> Result<Vec<PendingPhoto>, QueueError> {
        let mut photos: Vec<PendingPhoto> = self
            .all()
            .await?
            .into_iter()
            .filter(|photo| !photo.synced)
            .collect();
        photos.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then(a.local_id.cmp(&b.local_id))
        });
        Ok(photos)
    }

    async fn is_pending(&self, id: u64) -> Result<bool, QueueError> {
        Ok(self.get(id).await?.is_some_and(|photo| !photo.synced))
    }

    async fn reconcile(&self, id: u64) -> Result<(), QueueError> {
        self.mark_synced(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreHandle;
    use tempfile::TempDir;

    async fn queue(dir: &TempDir) -> PhotoQueue {
        PhotoQueue::new(StoreHandle::new(dir.path().to_path_buf()).init().await.unwrap())
    }

    fn photo(victim_id: i64, byte: u8) -> NewPhoto {
        NewPhoto::from_image_bytes(victim_id, "image/jpeg", &[byte; 4])
    }

    #[tokio::test]
    async fn test_latest_pending_is_newest_capture() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir).await;

        queue.enqueue(photo(3, 1)).await.unwrap();
        let newest = queue.enqueue(photo(3, 2)).await.unwrap();
        queue.enqueue(photo(4, 3)).await.unwrap();

        let latest = queue.latest_pending(3).await.unwrap().unwrap();
        assert_eq!(latest.local_id, newest);
        assert!(queue.latest_pending(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_synced_hides_entry() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir).await;

        let id = queue.enqueue(photo(3, 1)).await.unwrap();
        queue.mark_synced(id).await.unwrap();
        queue.mark_synced(id).await.unwrap();

        assert!(queue.list_pending(3).await.unwrap().is_empty());
        assert!(queue.pending_all().await.unwrap().is_empty());
        assert!(!queue.is_pending(id).await.unwrap());
        assert_eq!(queue.purge_synced().await.unwrap(), 1);
        assert!(queue.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_synced_after_delete_is_noop() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir).await;

        let id = queue.enqueue(photo(3, 1)).await.unwrap();
        queue.delete_by_id(id).await.unwrap();
        queue.mark_synced(id).await.unwrap();
        assert!(queue.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_undecodable_data_url() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir).await;

        let bad = NewPhoto {
            victim_id: 1,
            data_url: "blob:http://localhost/abc".to_string(),
        };
        assert!(matches!(
            queue.enqueue(bad).await,
            Err(QueueError::InvalidPayload { .. })
        ));
        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }
}
