use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::{CacheRecord, PaginationMeta, StoredRecord};
use crate::store::{LocalStore, StoreError, StoreName};

/// Consider cache stale after 1 hour.
/// Only drives the "refresh soon" hint; stale data is still served.
const CACHE_STALE_MINUTES: i64 = 60;

/// Cache key of the full victims list
pub const VICTIMS_KEY: &str = "all-victims-cache";

/// Cache key of the victim statistics summary
pub const VICTIM_STATS_KEY: &str = "victim-stats";

/// Cache key of the full evaluations list
pub const EVALUATIONS_KEY: &str = "all-evaluations-cache";

/// Cache key of the plan-of-life question catalog
pub const PLAN_VIE_QUESTIONS_KEY: &str = "plan-vie-questions";

#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub meta: Option<Value>,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        Utc::now() - self.cached_at > max_age
    }

    /// Paging metadata saved alongside the data, if any.
    pub fn pagination(&self) -> Option<PaginationMeta> {
        self.meta
            .as_ref()
            .and_then(|meta| serde_json::from_value(meta.clone()).ok())
    }
}

/// Typed access to the cache stores of a `LocalStore`.
/// Clone is cheap - the store is shared behind an `Arc`.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<LocalStore>,
}

impl CacheManager {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    fn ensure_cache_store(store: StoreName) -> Result<(), StoreError> {
        if store.is_cache() {
            Ok(())
        } else {
            Err(StoreError::WrongKind {
                store: store.dir_name(),
                expected: "cached",
            })
        }
    }

    /// Replace the cached payload for `key`. No merge with the previous value.
    pub async fn save_to_cache(
        &self,
        store: StoreName,
        key: &str,
        data: &Value,
        meta: Option<Value>,
    ) -> Result<(), StoreError> {
        Self::ensure_cache_store(store)?;
        let record = CacheRecord::new(key, data.clone(), meta);
        self.store
            .put(store, key, &StoredRecord::CachedCollection(record))
            .await
    }

    /// Cached payload for `key`, or `None` when nothing was ever cached.
    pub async fn get_from_cache(
        &self,
        store: StoreName,
        key: &str,
    ) -> Result<Option<CachedData<Value>>, StoreError> {
        Self::ensure_cache_store(store)?;
        let record = match self.store.get(store, key).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        match record.into_cached() {
            Some(cached) => Ok(Some(CachedData {
                data: cached.payload,
                meta: cached.meta,
                cached_at: cached.stored_at,
            })),
            None => Err(StoreError::WrongKind {
                store: store.dir_name(),
                expected: "cached",
            }),
        }
    }

    /// Raw cache record, including the "has entries" check used for
    /// fallback decisions.
    pub async fn get_record(
        &self,
        store: StoreName,
        key: &str,
    ) -> Result<Option<CacheRecord>, StoreError> {
        Self::ensure_cache_store(store)?;
        Ok(self.store.get(store, key).await?.and_then(StoredRecord::into_cached))
    }

    /// Whether the entry exists and is younger than `max_age`.
    ///
    /// Advisory only: callers still serve an invalid entry and refresh it in
    /// the background.
    pub async fn is_cache_valid(&self, store: StoreName, key: &str, max_age: Duration) -> bool {
        match self.get_from_cache(store, key).await {
            Ok(Some(cached)) => !cached.is_older_than(max_age),
            Ok(None) => false,
            Err(e) => {
                debug!(store = %store, key, error = %e, "Failed to load cache for validity check");
                false
            }
        }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        store: StoreName,
        key: &str,
    ) -> Result<Option<CachedData<T>>, StoreError> {
        let cached = match self.get_from_cache(store, key).await? {
            Some(cached) => cached,
            None => return Ok(None),
        };
        let data = serde_json::from_value(cached.data)?;
        Ok(Some(CachedData {
            data,
            meta: cached.meta,
            cached_at: cached.cached_at,
        }))
    }

    async fn save<T: Serialize + ?Sized>(
        &self,
        store: StoreName,
        key: &str,
        data: &T,
        meta: Option<Value>,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(data)?;
        self.save_to_cache(store, key, &value, meta).await
    }

    // ===== Victims =====

    pub async fn load_victims<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<CachedData<Vec<T>>>, StoreError> {
        self.load(StoreName::Victims, VICTIMS_KEY).await
    }

    /// Save the fully assembled victims list; paging happens on read.
    pub async fn save_victims<T: Serialize>(&self, victims: &[T]) -> Result<(), StoreError> {
        let meta = PaginationMeta::derive(victims.len(), 1, victims.len());
        self.save(
            StoreName::Victims,
            VICTIMS_KEY,
            victims,
            Some(serde_json::to_value(meta)?),
        )
        .await
    }

    // ===== Victim Stats =====

    pub async fn load_victim_stats<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<CachedData<T>>, StoreError> {
        self.load(StoreName::VictimStats, VICTIM_STATS_KEY).await
    }

    pub async fn save_victim_stats<T: Serialize>(&self, stats: &T) -> Result<(), StoreError> {
        self.save(StoreName::VictimStats, VICTIM_STATS_KEY, stats, None).await
    }

    // ===== Evaluations =====

    pub async fn load_evaluations<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<CachedData<Vec<T>>>, StoreError> {
        self.load(StoreName::Evaluations, EVALUATIONS_KEY).await
    }

    pub async fn save_evaluations<T: Serialize>(&self, evaluations: &[T]) -> Result<(), StoreError> {
        self.save(StoreName::Evaluations, EVALUATIONS_KEY, evaluations, None).await
    }

    // ===== Plan-of-life Questions =====

    pub async fn load_plan_vie_questions<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<CachedData<Vec<T>>>, StoreError> {
        self.load(StoreName::PlanVieQuestions, PLAN_VIE_QUESTIONS_KEY).await
    }

    pub async fn save_plan_vie_questions<T: Serialize>(
        &self,
        questions: &[T],
    ) -> Result<(), StoreError> {
        self.save(StoreName::PlanVieQuestions, PLAN_VIE_QUESTIONS_KEY, questions, None)
            .await
    }

    // ===== Reference Data =====

    pub async fn load_reference<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CachedData<T>>, StoreError> {
        self.load(StoreName::ReferenceData, key).await
    }

    pub async fn save_reference<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StoreError> {
        self.save(StoreName::ReferenceData, key, data, None).await
    }

    // ===== Cache Age Information =====

    async fn load_age(&self, store: StoreName, key: &str) -> Option<String> {
        match self.get_from_cache(store, key).await {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(store = %store, key, error = %e, "Failed to load cache for age display");
                None
            }
        }
    }

    pub async fn get_cache_ages(&self) -> CacheAges {
        CacheAges {
            victims: self.load_age(StoreName::Victims, VICTIMS_KEY).await,
            victim_stats: self.load_age(StoreName::VictimStats, VICTIM_STATS_KEY).await,
            evaluations: self.load_age(StoreName::Evaluations, EVALUATIONS_KEY).await,
            plan_vie_questions: self
                .load_age(StoreName::PlanVieQuestions, PLAN_VIE_QUESTIONS_KEY)
                .await,
        }
    }

    async fn is_cache_stale(&self, store: StoreName, key: &str) -> bool {
        match self.get_from_cache(store, key).await {
            Ok(Some(cached)) => cached.is_stale(),
            Ok(None) => true,
            Err(e) => {
                debug!(store = %store, key, error = %e, "Failed to load cache for staleness check");
                true
            }
        }
    }

    /// Check if any of the core cached collections is stale
    pub async fn any_stale(&self) -> bool {
        self.is_cache_stale(StoreName::Victims, VICTIMS_KEY).await
            || self.is_cache_stale(StoreName::VictimStats, VICTIM_STATS_KEY).await
            || self.is_cache_stale(StoreName::Evaluations, EVALUATIONS_KEY).await
    }
}

#[derive(Debug, Default)]
pub struct CacheAges {
    pub victims: Option<String>,
    pub victim_stats: Option<String>,
    pub evaluations: Option<String>,
    pub plan_vie_questions: Option<String>,
}

impl CacheAges {
    pub fn victims_age(&self) -> String {
        self.victims.clone().unwrap_or_else(|| "never".to_string())
    }

    /// Age of the first cached collection found, "never" if none is cached
    pub fn last_updated(&self) -> String {
        [&self.victims, &self.victim_stats, &self.evaluations]
            .into_iter()
            .flatten()
            .next()
            .cloned()
            .unwrap_or_else(|| "never".to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
