//! ScanToSplit Storage Health
//!
//! The persistence integrity layer:
//! - quota monitoring against the platform estimate or a local fallback
//! - structural validation and repair of persisted entries
//! - schema version tracking and chained data migrations
//! - full export, import and reset of the persisted namespace
//!
//! Every operation comes in two forms. `try_*` returns a [`Result`] carrying
//! the failure kind; the plain form degrades to a sentinel value and logs,
//! so storage trouble never blocks the caller.

mod checker;
pub mod corruption;
mod error;
mod events;
mod platform;
mod quota;
mod transfer;
mod types;
mod version;

use std::sync::Arc;

use scantosplit_storage::KeyValueStore;

pub use checker::{HealthChecker, QuarantinedEntry, RepairPolicy};
pub use error::IntegrityError;
pub use events::EventLog;
pub use platform::{FixedPlatform, StorageEstimate, StoragePlatform};
pub use quota::{
    format_bytes, format_percentage, QuotaMonitor, DEFAULT_ESTIMATE_TIMEOUT, DEFAULT_QUOTA_BYTES,
};
pub use transfer::{encode_value, export_entries, Dump, ExportImport};
pub use types::{
    is_reserved, DataVersionRecord, QuotaStatus, StorageEvent, StorageEventType, StorageHealth,
    StorageQuota, CURRENT_VERSION, EVENTS_KEY, HEALTH_KEY, QUARANTINE_PREFIX, RESERVED_KEYS,
    VERSION_KEY,
};
pub use version::{MigrationOutcome, MigrationStep, TransformResult, VersionMigrator};

/// Store handle shared by every component
pub type SharedStore = Arc<dyn KeyValueStore>;

pub type Result<T> = std::result::Result<T, IntegrityError>;
