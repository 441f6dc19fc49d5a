//! Synchronization of pending-write queues with the remote service.
//!
//! A sync run drains the document queue, then the photo queue, replaying
//! each entry FIFO. A failed entry stays queued for the next run and never
//! blocks the entries behind it. Runs are triggered by a reconnect or by an
//! explicit call; there is no polling timer.

pub mod report;
pub mod service;

pub use report::{QueueReport, SyncEntryFailure, SyncReport};
pub use service::SyncService;
