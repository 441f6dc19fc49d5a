//! Durable local storage for cached payloads and pending writes.
//!
//! This module provides the `LocalStore`, a versioned set of named stores
//! persisted under a data directory. Each store is a directory holding one
//! JSON file per record; writes go through a temp file and a rename so a
//! reader never sees a partially written record.
//!
//! Stores come in two flavors:
//! - cache stores, keyed by explicit strings ("all-victims-cache")
//! - queue stores, keyed by sequence numbers the store allocates

pub mod error;
pub mod local;
pub mod schema;

pub use error::StoreError;
pub use local::{LocalStore, StoreHandle};
pub use schema::{KeyKind, Manifest, StoreName, SCHEMA_VERSION};
