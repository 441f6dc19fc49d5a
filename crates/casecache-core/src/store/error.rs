use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Local storage unavailable at {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Storage I/O error in {store}: {source}")]
    Io {
        store: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("Store {store} does not hold {expected} records")]
    WrongKind {
        store: &'static str,
        expected: &'static str,
    },
}

impl StoreError {
    /// Build an `Unavailable` error from a message, for callers that only
    /// kept the text of the original failure.
    pub fn unavailable(path: PathBuf, message: &str) -> Self {
        StoreError::Unavailable {
            path,
            source: io::Error::other(message.to_string()),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}
