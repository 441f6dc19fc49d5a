//! casecache core library.
//!
//! Offline resilience for a case-management client: a durable local store,
//! read-through entity caches, pending-write queues for documents and photos,
//! a network-aware fetch dispatcher and a synchronization service that
//! drains the queues when connectivity returns.
//!
//! Most collaborators only need [`OfflineClient`], which wires the pieces
//! together from a [`Config`] and a [`ConnectivityMonitor`].

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod dispatcher;
pub mod models;
pub mod offline;
pub mod queue;
pub mod store;
pub mod sync;

pub use api::{ApiClient, ApiError, RemoteService};
pub use cache::CacheManager;
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ListenerId};
pub use dispatcher::{DispatchError, DispatchState, Dispatcher, FetchOutcome, RequestOptions};
pub use models::{NewDocument, NewPhoto, PaginationMeta, PendingDocument, PendingPhoto};
pub use offline::{LatestPhoto, OfflineClient, PendingDocumentSummary};
pub use queue::{DocumentQueue, PhotoQueue, QueueError};
pub use store::{LocalStore, StoreError, StoreHandle, StoreName};
pub use sync::{SyncReport, SyncService};
