//! Pending-write queues for mutations made while offline.
//!
//! Each queue persists its entries in a sequential store of the local store,
//! so entries survive restarts until the sync service hands them to the
//! remote service. Enqueueing never touches the network.
//!
//! Reconciliation strategy per queue type:
//! - documents are deleted once the remote service accepts them
//! - photos are marked synced and excluded from every pending listing

pub mod documents;
pub mod photos;

pub use documents::DocumentQueue;
pub use photos::PhotoQueue;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Could not queue {kind} for upload: {source}")]
    WriteFailure {
        kind: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    #[error("Pending queue storage error: {0}")]
    Storage(#[from] StoreError),
}

/// A queue the sync service can drain.
#[async_trait]
pub trait ReplayQueue: Send + Sync {
    type Entry: Send + Sync;

    /// Name used in logs and sync reports
    fn name(&self) -> &'static str;

    fn entry_id(entry: &Self::Entry) -> u64;

    /// Every unsynced entry in creation order.
    async fn pending_all(&self) -> Result<Vec<Self::Entry>, QueueError>;

    /// Whether the entry is still waiting to be replayed.
    async fn is_pending(&self, id: u64) -> Result<bool, QueueError>;

    /// Record that the remote service accepted the entry. A no-op for ids
    /// already reconciled or removed.
    async fn reconcile(&self, id: u64) -> Result<(), QueueError>;
}
