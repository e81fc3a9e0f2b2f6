//! The key/value abstraction shared by every backend

use crate::Result;

/// A synchronous, string-keyed persistent store.
///
/// Implementations enumerate keys in ascending order. Values are opaque
/// strings; interpreting them is left to the caller.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Approximate in-browser footprint of an entry: two bytes per UTF-16
/// code unit of key and value.
pub fn utf16_footprint(key: &str, value: &str) -> u64 {
    2 * (key.encode_utf16().count() as u64 + value.encode_utf16().count() as u64)
}
