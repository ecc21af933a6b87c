//! Durable client storage
//!
//! This module provides a small synchronous key/value store used to keep
//! client state (session credentials, connection history) across restarts.
//! Writes go straight through to the backing store; there is no write-behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Synchronous key/value storage that survives a process restart
pub trait DurableStorage: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Set a key-value pair, replacing any previous value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Set several keys as one write
    fn set_many(&self, pairs: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in pairs {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys as one write
    fn remove_many(&self, keys: &[&str]) -> StorageResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-memory storage, mostly useful for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn set_many(&self, pairs: &[(&str, &str)]) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        for (key, value) in pairs {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// Storage backed by a single JSON object on disk
///
/// The whole map is rewritten on every mutation through a temporary file
/// and a rename. The in-memory map only changes once that write succeeded,
/// so memory and disk never disagree.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) a file-backed store at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        info!(
            "Opened file storage at {} with {} keys",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Flushed {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }
}

impl FileStorage {
    /// Apply `change` to a copy of the map and swap it in after it is on disk
    fn update<F>(&self, change: F) -> StorageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        let mut next = entries.clone();
        if !change(&mut next) {
            return Ok(());
        }

        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.remove_many(&[key])
    }

    fn set_many(&self, pairs: &[(&str, &str)]) -> StorageResult<()> {
        self.update(|entries| {
            let mut changed = false;
            for (key, value) in pairs {
                if entries.get(*key).map(String::as_str) != Some(*value) {
                    entries.insert(key.to_string(), value.to_string());
                    changed = true;
                }
            }
            changed
        })
    }

    fn remove_many(&self, keys: &[&str]) -> StorageResult<()> {
        self.update(|entries| {
            let mut changed = false;
            for key in keys {
                changed |= entries.remove(*key).is_some();
            }
            changed
        })
    }
}

/// A view over a storage backend that prefixes every key
///
/// Each frontend variant keeps its keys in its own namespace, e.g.
/// `admin_token` next to `dingtalk_user_token`.
#[derive(Clone)]
pub struct NamespacedStorage {
    inner: Arc<dyn DurableStorage>,
    prefix: String,
}

impl NamespacedStorage {
    /// Wrap `inner` so every key is stored as `{prefix}{key}`
    pub fn new(inner: Arc<dyn DurableStorage>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// The key prefix of this namespace
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn get(&self, name: &str) -> StorageResult<Option<String>> {
        self.inner.get(&self.key(name))
    }

    pub fn set(&self, name: &str, value: &str) -> StorageResult<()> {
        self.inner.set(&self.key(name), value)
    }

    pub fn remove(&self, name: &str) -> StorageResult<()> {
        self.inner.remove(&self.key(name))
    }

    /// Set a group of keys in one write
    pub fn set_all(&self, pairs: &[(&str, &str)]) -> StorageResult<()> {
        let keys: Vec<String> = pairs.iter().map(|(name, _)| self.key(name)).collect();
        let pairs: Vec<(&str, &str)> = keys
            .iter()
            .zip(pairs)
            .map(|(key, (_, value))| (key.as_str(), *value))
            .collect();
        self.inner.set_many(&pairs)
    }

    /// Remove a group of keys in one write; either all go or none do
    pub fn remove_all(&self, names: &[&str]) -> StorageResult<()> {
        let keys: Vec<String> = names.iter().map(|name| self.key(name)).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.inner.remove_many(&keys)
    }

    /// Read a JSON value stored under `name`
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> StorageResult<Option<T>> {
        match self.get(name)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store `value` as JSON under `name`
    pub fn set_json<T: serde::Serialize>(&self, name: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(name, &raw)
    }
}
