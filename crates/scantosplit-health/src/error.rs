//! Integrity error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Storage error: {0}")]
    Storage(#[from] scantosplit_storage::StorageError),

    #[error("Entry missing or empty: {0}")]
    Missing(String),

    #[error("Entry {key} is not valid JSON: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Quota estimate unavailable: {0}")]
    QuotaUnavailable(String),

    #[error("Migration {from} -> {to} failed: {reason}")]
    Migration {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Import failed at {key} after {written} entries: {reason}")]
    Import {
        key: String,
        written: usize,
        reason: String,
    },

    #[error("No quarantined entry for key: {0}")]
    NotQuarantined(String),
}
