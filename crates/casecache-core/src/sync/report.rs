use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One queued entry that could not be replayed this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncEntryFailure {
    pub local_id: u64,
    pub message: String,
}

/// Outcome of draining one queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct QueueReport {
    /// Entries replayed against the remote service
    pub attempted: usize,
    pub synced: usize,
    /// Entries another run reconciled before this one reached them
    pub skipped: usize,
    pub failures: Vec<SyncEntryFailure>,
    /// Already-synced entries removed from the queue after the drain
    #[serde(default)]
    pub purged: usize,
    /// Set when the queue itself could not be read
    pub queue_error: Option<String>,
}

impl QueueReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.queue_error.is_none()
    }

    pub fn unreadable(message: String) -> Self {
        Self {
            queue_error: Some(message),
            ..Self::default()
        }
    }
}

/// Outcome of one sync run across every queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub documents: QueueReport,
    pub photos: QueueReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn synced_count(&self) -> usize {
        self.documents.synced + self.photos.synced
    }

    pub fn failed_count(&self) -> usize {
        self.documents.failed() + self.photos.failed()
    }

    pub fn is_clean(&self) -> bool {
        self.documents.is_clean() && self.photos.is_clean()
    }

    /// Short human-readable summary for notices and logs.
    pub fn summary(&self) -> String {
        if self.synced_count() == 0 && self.is_clean() {
            return "Nothing to sync".to_string();
        }
        let mut summary = format!("{} synced", self.synced_count());
        if self.failed_count() > 0 {
            summary.push_str(&format!(", {} failed (will retry)", self.failed_count()));
        }
        for (name, queue) in [("documents", &self.documents), ("photos", &self.photos)] {
            if let Some(ref err) = queue.queue_error {
                summary.push_str(&format!(", {} unreadable: {}", name, err));
            }
        }
        summary
    }
}
