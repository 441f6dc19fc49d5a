use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Current on-disk schema version.
///
/// History:
/// - 1: victims, victim_stats, pending_documents
/// - 2: plan_vie_questions, pending_photos
/// - 3: evaluations, reference_data
pub const SCHEMA_VERSION: u32 = 3;

/// How records in a store are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Explicit string keys, one record per logical cache key
    Named,
    /// Sequence numbers allocated by the store on insert
    AutoIncrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreName {
    Victims,
    VictimStats,
    Evaluations,
    PlanVieQuestions,
    ReferenceData,
    PendingDocuments,
    PendingPhotos,
}

impl StoreName {
    pub const ALL: [StoreName; 7] = [
        StoreName::Victims,
        StoreName::VictimStats,
        StoreName::Evaluations,
        StoreName::PlanVieQuestions,
        StoreName::ReferenceData,
        StoreName::PendingDocuments,
        StoreName::PendingPhotos,
    ];

    /// Directory name of this store under the data directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            StoreName::Victims => "victims",
            StoreName::VictimStats => "victim_stats",
            StoreName::Evaluations => "evaluations",
            StoreName::PlanVieQuestions => "plan_vie_questions",
            StoreName::ReferenceData => "reference_data",
            StoreName::PendingDocuments => "pending_documents",
            StoreName::PendingPhotos => "pending_photos",
        }
    }

    pub fn key_kind(&self) -> KeyKind {
        match self {
            StoreName::PendingDocuments | StoreName::PendingPhotos => KeyKind::AutoIncrement,
            _ => KeyKind::Named,
        }
    }

    pub fn is_cache(&self) -> bool {
        self.key_kind() == KeyKind::Named
    }

    /// Schema version that introduced this store.
    pub fn introduced_in(&self) -> u32 {
        match self {
            StoreName::Victims | StoreName::VictimStats | StoreName::PendingDocuments => 1,
            StoreName::PlanVieQuestions | StoreName::PendingPhotos => 2,
            StoreName::Evaluations | StoreName::ReferenceData => 3,
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Contents of `schema.json` at the root of the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub stores: BTreeSet<StoreName>,
    /// Last allocated sequence number per queue store, keyed by directory name
    #[serde(default)]
    pub sequences: BTreeMap<String, u64>,
}

impl Manifest {
    /// Manifest for a data directory created at the current version.
    pub fn fresh() -> Self {
        Self {
            version: SCHEMA_VERSION,
            stores: StoreName::ALL.into_iter().collect(),
            sequences: BTreeMap::new(),
        }
    }

    /// Bring an older manifest up to the current version.
    ///
    /// Upgrades only ever add stores; nothing recorded in `self` is removed,
    /// so queued records survive application updates. A manifest written by
    /// a newer version is returned unchanged.
    pub fn upgrade(mut self) -> (Self, Vec<StoreName>) {
        if self.version >= SCHEMA_VERSION {
            return (self, Vec::new());
        }

        let added: Vec<StoreName> = StoreName::ALL
            .into_iter()
            .filter(|store| store.introduced_in() <= SCHEMA_VERSION && !self.stores.contains(store))
            .collect();

        self.stores.extend(added.iter().copied());
        self.version = SCHEMA_VERSION;
        (self, added)
    }

    pub fn contains(&self, store: StoreName) -> bool {
        self.stores.contains(&store)
    }

    /// Allocate the next sequence number for a queue store.
    pub fn next_sequence(&mut self, store: StoreName) -> u64 {
        let counter = self.sequences.entry(store.dir_name().to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}
