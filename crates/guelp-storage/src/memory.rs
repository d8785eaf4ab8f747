//! In-process storage backend.

use crate::{StorageBackend, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Volatile backend for environments without durable storage, and for tests.
/// Everything is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.entries.read().map_err(|_| poisoned())
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.entries.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory storage lock poisoned".to_string())
}

impl StorageBackend for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.write()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }
}
