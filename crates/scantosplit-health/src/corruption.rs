//! Corruption detection
//!
//! Pure helpers: a change-detection fingerprint and structural validation
//! of single entries. An entry is corrupt when it is absent, empty, or not
//! parseable as JSON.

use serde::de::IgnoredAny;

use crate::error::IntegrityError;
use crate::Result;
use scantosplit_storage::KeyValueStore;

/// Rolling 31-multiplier hash over UTF-16 code units with 32-bit
/// wraparound, rendered as the base-36 magnitude.
///
/// This is a change detector and nothing more. It is trivially forgeable
/// and must never be used for integrity or security decisions.
pub fn checksum(data: &str) -> String {
    let mut hash: i32 = 0;
    for unit in data.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    to_base36(u64::from(hash.unsigned_abs()))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Validate a raw value already read from the store.
pub fn validate_value(key: &str, raw: Option<&str>) -> Result<()> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(IntegrityError::Missing(key.to_string())),
    };

    serde_json::from_str::<IgnoredAny>(raw)
        .map(|_| ())
        .map_err(|source| IntegrityError::Parse {
            key: key.to_string(),
            source,
        })
}

/// Read and validate an entry, reporting why it failed.
pub fn try_validate(store: &dyn KeyValueStore, key: &str) -> Result<()> {
    let raw = store.get(key)?;
    validate_value(key, raw.as_deref())
}

/// `true` when the entry exists and holds well-formed JSON.
pub fn validate(store: &dyn KeyValueStore, key: &str) -> bool {
    match try_validate(store, key) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "Entry failed validation");
            false
        }
    }
}
