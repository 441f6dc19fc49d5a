use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{KeyKind, Manifest, StoreError, StoreName, SCHEMA_VERSION};
use crate::models::{RecordKey, StoredRecord};

/// Manifest file name at the root of the data directory
const MANIFEST_FILE: &str = "schema.json";

/// Extension of record files inside a store directory
const RECORD_EXTENSION: &str = "json";

/// Distinguishes temp files of concurrent writes to the same key
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Lazily opened, shared handle to a `LocalStore`.
///
/// Concurrent `init()` calls resolve to the same `Arc<LocalStore>`; the
/// directory layout and manifest are created at most once per handle.
#[derive(Clone)]
pub struct StoreHandle {
    root: PathBuf,
    cell: Arc<OnceCell<Arc<LocalStore>>>,
}

impl StoreHandle {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open (or create) the store set. A failed attempt is not cached, so a
    /// later call retries.
    pub async fn init(&self) -> Result<Arc<LocalStore>, StoreError> {
        self.cell
            .get_or_try_init(|| LocalStore::open(self.root.clone()))
            .await
            .cloned()
    }
}

/// A versioned set of named record stores under one data directory.
pub struct LocalStore {
    root: PathBuf,
    manifest: Mutex<Manifest>,
}

impl LocalStore {
    async fn open(root: PathBuf) -> Result<Arc<Self>, StoreError> {
        fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::Unavailable {
                path: root.clone(),
                source,
            })?;

        let manifest_path = root.join(MANIFEST_FILE);
        let existing = match fs::read(&manifest_path).await {
            Ok(bytes) => Some(serde_json::from_slice::<Manifest>(&bytes).map_err(|e| {
                StoreError::Corrupt {
                    path: manifest_path.clone(),
                    message: e.to_string(),
                }
            })?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(StoreError::Unavailable {
                    path: manifest_path,
                    source,
                })
            }
        };

        let manifest = match existing {
            Some(found) if found.version > SCHEMA_VERSION => {
                warn!(
                    version = found.version,
                    supported = SCHEMA_VERSION,
                    "Local store was written by a newer version, opening as-is"
                );
                found
            }
            Some(found) => {
                let from = found.version;
                let (upgraded, added) = found.upgrade();
                if !added.is_empty() {
                    info!(from, to = upgraded.version, added = ?added, "Upgrading local store schema");
                }
                upgraded
            }
            None => {
                info!(path = %root.display(), "Creating local store");
                Manifest::fresh()
            }
        };

        for store in &manifest.stores {
            let dir = root.join(store.dir_name());
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::Unavailable { path: dir, source })?;
        }

        // Writing the manifest also proves the directory is writable
        let contents = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&manifest_path, &contents)
            .await
            .map_err(|source| StoreError::Unavailable {
                path: manifest_path.clone(),
                source,
            })?;

        Ok(Arc::new(Self {
            root,
            manifest: Mutex::new(manifest),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn schema_version(&self) -> u32 {
        self.manifest.lock().await.version
    }

    fn store_dir(&self, store: StoreName) -> PathBuf {
        self.root.join(store.dir_name())
    }

    fn record_path(&self, store: StoreName, key: &RecordKey) -> PathBuf {
        self.store_dir(store).join(key.file_name())
    }

    /// Upsert a record. The previous value, if any, is fully replaced.
    pub async fn put(
        &self,
        store: StoreName,
        key: impl Into<RecordKey>,
        record: &StoredRecord,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let contents = serde_json::to_vec(record)?;
        write_atomic(&self.record_path(store, &key), &contents)
            .await
            .map_err(|source| io_error(store, source))?;
        debug!(store = %store, key = %key, kind = record.kind(), "Stored record");
        Ok(())
    }

    /// Read one record, `None` when the key is absent.
    pub async fn get(
        &self,
        store: StoreName,
        key: impl Into<RecordKey>,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let path = self.record_path(store, &key.into());
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    path,
                    message: e.to_string(),
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(store, source)),
        }
    }

    /// Insert into a queue store under a freshly allocated sequence number.
    ///
    /// `build` receives the allocated number so the record can carry its own
    /// id. Returns the number once the record is on disk.
    pub async fn add<F>(&self, store: StoreName, build: F) -> Result<u64, StoreError>
    where
        F: FnOnce(u64) -> StoredRecord,
    {
        if store.key_kind() != KeyKind::AutoIncrement {
            return Err(StoreError::WrongKind {
                store: store.dir_name(),
                expected: "sequential",
            });
        }

        let id = {
            let mut manifest = self.manifest.lock().await;
            let id = manifest.next_sequence(store);
            let contents = serde_json::to_vec_pretty(&*manifest)?;
            write_atomic(&self.root.join(MANIFEST_FILE), &contents)
                .await
                .map_err(|source| io_error(store, source))?;
            id
        };

        self.put(store, id, &build(id)).await?;
        Ok(id)
    }

    /// All records of a store in ascending key order.
    ///
    /// Records deleted while the listing runs are skipped, as are files that
    /// fail to parse (logged).
    pub async fn get_all(&self, store: StoreName) -> Result<Vec<StoredRecord>, StoreError> {
        let dir = self.store_dir(store);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(store, source)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(store, source))?
        {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| !name.starts_with('.'));
            if is_record {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(io_error(store, source)),
            };
            match serde_json::from_slice::<StoredRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(store = %store, path = %path.display(), error = %e, "Skipping unreadable record");
                }
            }
        }
        Ok(records)
    }

    /// Remove a record. Removing a missing key succeeds.
    pub async fn delete(
        &self,
        store: StoreName,
        key: impl Into<RecordKey>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        match fs::remove_file(self.record_path(store, &key)).await {
            Ok(()) => {
                debug!(store = %store, key = %key, "Deleted record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(store, source)),
        }
    }
}

fn io_error(store: StoreName, source: io::Error) -> StoreError {
    StoreError::Io {
        store: store.dir_name(),
        source,
    }
}

/// Write `contents` to `path` through a synced temp file and a rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let tmp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
