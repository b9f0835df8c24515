//! Durable key-value store.
//!
//! The subsystem treats storage as a synchronous string store that is
//! always available but may fail. Callers go through [`load_json`] and
//! [`save_json`], which turn every failure into an empty default on read
//! and a logged no-op on write.
//!
//! Two backends ship here: [`MemoryStore`] for tests and embedding, and
//! [`FileStore`], a single JSON document on disk guarded by an exclusive
//! `fs2` lock and replaced atomically on every write.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::StorageError;

/// Names of the slots used in the store.
pub mod slot {
    /// Dedup ledger: `key -> {ts, action}`
    pub const HISTORY: &str = "idempotentHistory";
    /// Outbox queue: array of payloads
    pub const OUTBOX: &str = "outbox";
    /// Score ledger: `testId -> {fullTotal, retryWrong}`
    pub const SCORES: &str = "fullScoreFix";
    /// Registered user profile
    pub const USER_DATA: &str = "userData";
    /// `"true"` once a registration was submitted
    pub const IS_REGISTERED: &str = "isRegistered";
    /// Set while a registration is being submitted
    pub const REGISTER_LOCK: &str = "register_lock";
    /// Per-test progress cleared when a different user registers
    pub const PROGRESS: &[&str] = &[
        "testProgress",
        "allTestsCompleted",
        "test1_retry",
        "test2_retry",
        "test3_retry",
    ];
}

/// Synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and decode a JSON slot, degrading to `T::default()` on any failure.
pub fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(slot = key, error = %e, "Unreadable store slot, using empty default");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!(slot = key, error = %e, "Store read failed, using empty default");
            T::default()
        }
    }
}

/// Encode and write a JSON slot. Failures are logged and dropped.
pub fn save_json<T>(store: &dyn KeyValueStore, key: &str, value: &T)
where
    T: Serialize + ?Sized,
{
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(slot = key, error = %e, "Failed to encode store slot, dropping write");
            return;
        }
    };
    if let Err(e) = store.set(key, &raw) {
        warn!(slot = key, error = %e, "Store write failed, dropping write");
    }
}

/// Remove a slot, logging failures.
pub fn remove_slot(store: &dyn KeyValueStore, key: &str) {
    if let Err(e) = store.remove(key) {
        warn!(slot = key, error = %e, "Store remove failed");
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all slots.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// File backend
// =============================================================================

/// A JSON object of string slots persisted in one file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Open (without creating) a store at `path`. Parent directories are
    /// created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
        }
    }

    /// Open a store at `path` and check it can be locked and read now,
    /// rather than degrading on every later access. A corrupt document is
    /// accepted; it is replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self::new(path);
        let guard = store.lock()?;
        let read = store.read_all();
        let _ = FileExt::unlock(&guard);
        match read {
            Ok(_) => Ok(store),
            Err(StorageError::Corrupt(reason)) => {
                warn!(path = %store.path.display(), %reason, "Store file is corrupt");
                Ok(store)
            }
            Err(e) => Err(e),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: &std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    fn lock(&self) -> Result<File, StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(&e))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.io_error(&e))?;
        file.lock_exclusive()
            .map_err(|_| StorageError::Lock(self.path.display().to_string()))?;
        Ok(file)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(self.io_error(&e)),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw =
            serde_json::to_vec_pretty(entries).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let mut tmp = File::create(&tmp_path).map_err(|e| self.io_error(&e))?;
        tmp.write_all(&raw).map_err(|e| self.io_error(&e))?;
        tmp.sync_all().map_err(|e| self.io_error(&e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(&e))
    }

    fn update(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let guard = self.lock()?;
        // A corrupt document is replaced rather than blocking every write.
        let mut entries = match self.read_all() {
            Err(StorageError::Corrupt(reason)) => {
                warn!(path = %self.path.display(), %reason, "Replacing corrupt store file");
                BTreeMap::new()
            }
            other => other?,
        };
        mutate(&mut entries);
        let result = self.write_all(&entries);
        let _ = FileExt::unlock(&guard);
        result
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.lock()?;
        let result = self.read_all().map(|mut entries| entries.remove(key));
        let _ = FileExt::unlock(&guard);
        result
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}
