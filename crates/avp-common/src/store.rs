//! Keyed record persistence
//!
//! Registries write through to a [`RecordStore`] after every mutation. The
//! store is best-effort from the registry's point of view: callers log a
//! failed `put` and keep going.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("store io error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("store serialization error for {key}: {source}")]
    Serialization {
        /// Record key
        key: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Durable home for one kind of record, addressed by a stable string key
pub trait RecordStore<R>: Send + Sync {
    /// Insert or replace the record stored under `key`
    ///
    /// # Errors
    /// Returns `StoreError` if the record cannot be written
    fn put(&self, key: &str, record: &R) -> Result<(), StoreError>;

    /// Load every stored record
    ///
    /// # Errors
    /// Returns `StoreError` if the backing medium cannot be read
    fn load_all(&self) -> Result<Vec<R>, StoreError>;
}

/// In-memory store, mainly for tests
pub struct MemoryStore<R> {
    records: Mutex<BTreeMap<String, R>>,
}

impl<R> MemoryStore<R> {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of stored records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl<R: Clone> MemoryStore<R> {
    /// Get a stored record
    #[must_use]
    pub fn get(&self, key: &str) -> Option<R> {
        self.records.lock().get(key).cloned()
    }
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("len", &self.len())
            .finish()
    }
}

impl<R: Clone + Send + Sync> RecordStore<R> for MemoryStore<R> {
    fn put(&self, key: &str, record: &R) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), record.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }
}

/// Directory of pretty-printed JSON files, one per key
///
/// Writes go to a hidden temp file first and are renamed into place, so a
/// crash mid-write never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    /// Open (and create if needed) a store rooted at `dir`
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the directory cannot be created
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

impl<R> RecordStore<R> for JsonDirStore
where
    R: Serialize + DeserializeOwned + Send + Sync,
{
    fn put(&self, key: &str, record: &R) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;

        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", encode_key(key)));
        fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &target).map_err(|source| StoreError::Io {
            path: target.clone(),
            source,
        })
    }

    fn load_all(&self) -> Result<Vec<R>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if hidden || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_slice::<R>(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable record");
                }
            }
        }
        Ok(records)
    }
}

/// Store wrapper that moves writes off the caller's thread
///
/// `put` only records the latest value per key and schedules a flush on
/// tokio's blocking pool, so a slow or failing backing store never stalls
/// the caller. Flushes drain pending records in key order under a single
/// lock, so an older value can never overwrite a newer one. Outside a tokio
/// runtime `put` flushes inline. Dropping the store flushes what is left.
pub struct WriteBehindStore<R> {
    shared: Arc<WriteBehind<R>>,
    runtime: Option<Handle>,
}

struct WriteBehind<R> {
    inner: Arc<dyn RecordStore<R>>,
    pending: Mutex<BTreeMap<String, R>>,
    flushing: Mutex<()>,
}

impl<R> WriteBehind<R> {
    fn flush(&self) -> Result<usize, StoreError> {
        let _flushing = self.flushing.lock();
        let batch = std::mem::take(&mut *self.pending.lock());
        let written = batch.len();

        let mut first_error = None;
        for (key, record) in batch {
            if let Err(err) = self.inner.put(&key, &record) {
                tracing::warn!(key = %key, error = %err, "deferred record write failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(written), Err)
    }
}

impl<R> WriteBehindStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Wrap `inner`, binding to the current tokio runtime if there is one
    #[must_use]
    pub fn new(inner: Arc<dyn RecordStore<R>>) -> Self {
        Self {
            shared: Arc::new(WriteBehind {
                inner,
                pending: Mutex::new(BTreeMap::new()),
                flushing: Mutex::new(()),
            }),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Records accepted but not yet written
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Write every pending record now, blocking the caller
    ///
    /// # Errors
    /// Returns the first `StoreError` from the backing store; the other
    /// records are still attempted
    pub fn flush(&self) -> Result<usize, StoreError> {
        self.shared.flush()
    }
}

impl<R> RecordStore<R> for WriteBehindStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn put(&self, key: &str, record: &R) -> Result<(), StoreError> {
        self.shared
            .pending
            .lock()
            .insert(key.to_string(), record.clone());

        match &self.runtime {
            Some(runtime) => {
                let shared = Arc::clone(&self.shared);
                drop(runtime.spawn_blocking(move || shared.flush()));
                Ok(())
            }
            None => self.shared.flush().map(|_| ()),
        }
    }

    fn load_all(&self) -> Result<Vec<R>, StoreError> {
        self.shared.flush()?;
        self.shared.inner.load_all()
    }
}

impl<R> Drop for WriteBehindStore<R> {
    fn drop(&mut self) {
        // failures are already logged per record
        let _ = self.shared.flush();
    }
}

impl<R> Debug for WriteBehindStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBehindStore")
            .field("pending", &self.shared.pending.lock().len())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Percent-encode anything outside `[A-Za-z0-9_-]` so distinct keys never
/// collide on disk
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
