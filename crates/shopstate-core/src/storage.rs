//! Durable key-value storage abstraction
//!
//! The layer treats durable storage as an opaque asynchronous capability:
//! `get(key) -> value | absent` and `set(key, value) -> ok | failure`.
//! Two implementations are provided: an in-process [`MemoryStore`] (tests and
//! fallback) and a [`JsonFileStore`] that survives process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::PersistenceError;

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Asynchronous string key-value store that survives process restarts
#[async_trait]
pub trait DurableKeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Durably store `value` under `key`
    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryStoreInner {
    data: Mutex<BTreeMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_latency: Mutex<Option<Duration>>,
    writes: AtomicU64,
}

/// In-memory store for testing and fallback
///
/// Clones share the same data, so a fresh consumer built on a clone sees
/// everything written before; this is how tests simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

impl MemoryStore {
    /// Create a new, empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with entries
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.insert(key, value);
        }
        store
    }

    /// Delay every write by `latency` before it is applied
    pub fn with_write_latency(self, latency: Duration) -> Self {
        *lock(&self.inner.write_latency) = Some(latency);
        self
    }

    /// Make every read fail (or succeed again)
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Toggle availability of both reads and writes
    pub fn set_available(&self, available: bool) {
        self.fail_reads(!available);
        self.fail_writes(!available);
    }

    /// Seed a value without going through the async interface
    pub fn insert<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        lock(&self.inner.data).insert(key.into(), value.into());
    }

    /// Peek at a stored value without going through the async interface
    pub fn peek(&self, key: &str) -> Option<String> {
        lock(&self.inner.data).get(key).cloned()
    }

    /// Number of `set` calls that reached this store (successful or not)
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableKeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable);
        }
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.inner.write_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::write_failed(key, "storage not available"));
        }
        self.insert(key, value);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// JSON File Storage Implementation
// ----------------------------------------------------------------------------

/// File-backed store keeping all keys in a single JSON object
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by the file at `path` (created on first write)
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `contents` to `temp`, flush it to disk, then rename it over the target
    async fn replace_contents(&self, temp: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(temp, &self.path).await
    }

    async fn load_map(&self) -> Result<BTreeMap<String, String>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&contents).map_err(|e| PersistenceError::Corrupt {
            reason: format!("{}: {}", self.path.display(), e),
        })
    }
}

#[async_trait]
impl DurableKeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let map = self.load_map().await.map_err(|e| match e {
            PersistenceError::Io(io) => PersistenceError::read_failed(key, io.to_string()),
            other => other,
        })?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.load_map().await?;
        map.insert(key.to_string(), value);

        let encoded = serde_json::to_string_pretty(&map)
            .map_err(|e| PersistenceError::write_failed(key, e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.temp_path();
        if let Err(e) = self.replace_contents(&temp, encoded.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(key, path = %self.path.display(), "persisted value");
        Ok(())
    }
}
