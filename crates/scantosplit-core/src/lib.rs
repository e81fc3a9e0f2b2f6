//! ScanToSplit Core
//!
//! Entry point the rest of the application uses to reach persisted state.
//! Storage problems are reported, never raised: every operation here
//! resolves to a usable value so the bill-splitting workflow keeps going.

mod config;
mod error;
mod integrity;

pub use config::Config;
pub use error::CoreError;
pub use integrity::StorageIntegrity;

// Re-export the integrity layer
pub use scantosplit_health::{
    format_bytes, format_percentage, DataVersionRecord, Dump, FixedPlatform, IntegrityError,
    MigrationOutcome, MigrationStep, QuarantinedEntry, QuotaStatus, RepairPolicy, SharedStore,
    StorageEstimate, StorageEvent, StorageEventType, StoragePlatform, StorageHealth,
    StorageQuota, CURRENT_VERSION,
};
pub use scantosplit_storage::{Database, KeyValueStore, MemoryStore, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
