//! In-memory key/value store

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StorageError;
use crate::store::{utf16_footprint, KeyValueStore};
use crate::Result;

/// Map-backed store. Clones share the same underlying map.
///
/// With a capacity set, writes that would push the UTF-16 footprint of the
/// whole store past it are rejected, the way a browser origin rejects writes
/// once its quota is spent.
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
    capacity_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            capacity_bytes: None,
        }
    }

    pub fn with_capacity_bytes(capacity_bytes: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current footprint of every entry
    pub fn footprint(&self) -> u64 {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| utf16_footprint(k, v))
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();

        if let Some(capacity) = self.capacity_bytes {
            let current: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| utf16_footprint(k, v))
                .sum();
            let required = utf16_footprint(key, value);

            if current + required > capacity {
                tracing::warn!(key = %key, required, capacity, "Rejected write over capacity");
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    required,
                    available: capacity.saturating_sub(current),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            capacity_bytes: self.capacity_bytes,
        }
    }
}
