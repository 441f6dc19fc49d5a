use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{PendingDocument, PendingPhoto};

/// Longest encoded name kept readable on disk; longer ones are hashed.
const MAX_ENCODED_NAME: usize = 120;

/// Key of a record inside one named store.
///
/// Cache stores use explicit string keys ("all-victims-cache"); queue stores
/// use sequence numbers allocated by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Named(String),
    Seq(u64),
}

impl RecordKey {
    /// File name used for this key on disk.
    ///
    /// Sequence keys are zero-padded so that lexical order matches numeric
    /// order. Named keys keep `[A-Za-z0-9._-]` and percent-encode the rest;
    /// when that gets too long for a file name the SHA-256 of the key is used.
    pub fn file_name(&self) -> String {
        match self {
            RecordKey::Seq(n) => format!("{:020}.json", n),
            RecordKey::Named(name) => {
                let mut encoded = String::with_capacity(name.len() + 7);
                encoded.push_str("k_");
                for byte in name.bytes() {
                    match byte {
                        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                            encoded.push(byte as char)
                        }
                        _ => encoded.push_str(&format!("%{:02X}", byte)),
                    }
                }
                if encoded.len() > MAX_ENCODED_NAME {
                    let mut hasher = Sha256::new();
                    hasher.update(name.as_bytes());
                    return format!("h_{:x}.json", hasher.finalize());
                }
                encoded.push_str(".json");
                encoded
            }
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Named(name) => f.write_str(name),
            RecordKey::Seq(n) => write!(f, "#{}", n),
        }
    }
}

impl From<&str> for RecordKey {
    fn from(name: &str) -> Self {
        RecordKey::Named(name.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(name: String) -> Self {
        RecordKey::Named(name)
    }
}

impl From<u64> for RecordKey {
    fn from(n: u64) -> Self {
        RecordKey::Seq(n)
    }
}

/// Shared envelope every persisted record exposes.
pub trait Envelope {
    fn key(&self) -> RecordKey;
    fn created_at(&self) -> DateTime<Utc>;
    /// Whether the record reflects state the remote service already holds.
    fn is_synced(&self) -> bool;
}

/// A cached network payload for one logical cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub store_key: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub stored_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(store_key: impl Into<String>, payload: Value, meta: Option<Value>) -> Self {
        Self {
            store_key: store_key.into(),
            payload,
            meta,
            stored_at: Utc::now(),
        }
    }

    /// A payload worth serving as an offline fallback: not `null` and not an
    /// empty array.
    pub fn has_entries(&self) -> bool {
        match &self.payload {
            Value::Null => false,
            Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }
}

impl Envelope for CacheRecord {
    fn key(&self) -> RecordKey {
        RecordKey::Named(self.store_key.clone())
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    fn is_synced(&self) -> bool {
        // A cached collection is a copy of server state
        true
    }
}

/// Every value a local store may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRecord {
    Document(PendingDocument),
    Photo(PendingPhoto),
    CachedCollection(CacheRecord),
}

impl StoredRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            StoredRecord::Document(_) => "document",
            StoredRecord::Photo(_) => "photo",
            StoredRecord::CachedCollection(_) => "cached_collection",
        }
    }

    pub fn into_document(self) -> Option<PendingDocument> {
        match self {
            StoredRecord::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn into_photo(self) -> Option<PendingPhoto> {
        match self {
            StoredRecord::Photo(photo) => Some(photo),
            _ => None,
        }
    }

    pub fn into_cached(self) -> Option<CacheRecord> {
        match self {
            StoredRecord::CachedCollection(record) => Some(record),
            _ => None,
        }
    }
}

impl Envelope for StoredRecord {
    fn key(&self) -> RecordKey {
        match self {
            StoredRecord::Document(doc) => doc.key(),
            StoredRecord::Photo(photo) => photo.key(),
            StoredRecord::CachedCollection(record) => record.key(),
        }
    }

    fn created_at(&self) -> DateTime<Utc> {
        match self {
            StoredRecord::Document(doc) => doc.created_at(),
            StoredRecord::Photo(photo) => photo.created_at(),
            StoredRecord::CachedCollection(record) => record.created_at(),
        }
    }

    fn is_synced(&self) -> bool {
        match self {
            StoredRecord::Document(doc) => doc.is_synced(),
            StoredRecord::Photo(photo) => photo.is_synced(),
            StoredRecord::CachedCollection(record) => record.is_synced(),
        }
    }
}
