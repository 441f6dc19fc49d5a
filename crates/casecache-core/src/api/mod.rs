//! REST API client module for the case-management service.
//!
//! This module provides the `ApiClient` for sending requests to the remote
//! HTTP/JSON service, and the `RemoteService` trait the sync service replays
//! queued writes through.

pub mod client;
pub mod error;

pub use client::{ApiClient, DocumentRegistration, RemoteRef, RemoteService};
pub use error::ApiError;
