//! Data models for locally persisted records.
//!
//! This module contains the structures the local store persists and the
//! derived views handed to collaborators:
//!
//! - `StoredRecord`: the closed set of record variants a store may hold
//! - `PendingDocument`, `PendingPhoto`: queued mutations awaiting upload
//! - `CacheRecord`: a cached network payload for one logical cache key
//! - `PaginationMeta`: paging metadata derived from a collection length

pub mod pagination;
pub mod pending;
pub mod record;

pub use pagination::{paginate, Page, PaginationMeta};
pub use pending::{DataUrl, NewDocument, NewPhoto, PendingDocument, PendingPhoto};
pub use record::{CacheRecord, Envelope, RecordKey, StoredRecord};
