use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Envelope, RecordKey};

/// Content type used when a document was queued without one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A document upload queued while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDocument {
    pub local_id: u64,
    pub victim_id: i64,
    pub label: String,
    #[serde(with = "base64_blob")]
    pub file_blob: Vec<u8>,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

impl PendingDocument {
    pub fn content_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
    }
}

impl Envelope for PendingDocument {
    fn key(&self) -> RecordKey {
        RecordKey::Seq(self.local_id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}

/// A victim photo captured while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPhoto {
    pub local_id: u64,
    pub victim_id: i64,
    pub photo_data_url: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

impl Envelope for PendingPhoto {
    fn key(&self) -> RecordKey {
        RecordKey::Seq(self.local_id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}

/// Input for queueing a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub victim_id: i64,
    pub label: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl NewDocument {
    pub(crate) fn into_pending(self, local_id: u64) -> PendingDocument {
        PendingDocument {
            local_id,
            victim_id: self.victim_id,
            label: self.label,
            file_blob: self.bytes,
            file_name: self.file_name,
            mime_type: self.mime_type,
            created_at: Utc::now(),
            synced: false,
        }
    }
}

/// Input for queueing a photo.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub victim_id: i64,
    pub data_url: String,
}

impl NewPhoto {
    /// Build a photo from raw image bytes, encoding them as a base64 data URL.
    pub fn from_image_bytes(victim_id: i64, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            victim_id,
            data_url: DataUrl::encode(mime_type, bytes),
        }
    }

    pub(crate) fn into_pending(self, local_id: u64) -> PendingPhoto {
        PendingPhoto {
            local_id,
            victim_id: self.victim_id,
            photo_data_url: self.data_url,
            captured_at: Utc::now(),
            synced: false,
        }
    }
}

/// A decoded `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUrl {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn encode(mime_type: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
    }

    pub fn parse(url: &str) -> Result<Self, String> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| "missing data: scheme".to_string())?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| "missing payload separator".to_string())?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| "only base64 data URLs are supported".to_string())?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64 payload: {}", e))?;
        let mime_type = if mime.is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            mime.to_string()
        };
        Ok(Self { mime_type, bytes })
    }

    /// File extension matching the mime type, used to name uploads.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

mod base64_blob {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
