//! Entity caches for offline data access.
//!
//! This module provides the `CacheManager`, typed read/write helpers over the
//! cache stores of the local store. Cached data is replaced wholesale on
//! every successful network read and served as a fallback when the network
//! fails. Staleness never blocks a read.
//!
//! Cached data types include:
//! - Victims list and victim statistics
//! - Evaluations
//! - Plan-of-life questions
//! - Generic reference data

pub mod manager;

pub use manager::{CacheAges, CacheManager, CachedData};
