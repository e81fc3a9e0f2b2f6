//! Export, import and reset of the whole persisted namespace

use std::sync::Arc;

use serde_json::Value;

use scantosplit_storage::KeyValueStore;

use crate::corruption::checksum;
use crate::error::IntegrityError;
use crate::events::EventLog;
use crate::types::{StorageEvent, StorageEventType};
use crate::version::VersionMigrator;
use crate::{Result, SharedStore};

/// Key-to-value document mirroring the store one entry per key.
pub type Dump = serde_json::Map<String, Value>;

/// Snapshot every entry. Values that parse as JSON are embedded
/// structurally, anything else is kept as its raw string.
pub fn export_entries(store: &dyn KeyValueStore) -> Result<Dump> {
    let mut dump = Dump::new();

    for key in store.keys()? {
        // Removed between enumeration and read
        let Some(raw) = store.get(&key)? else {
            continue;
        };

        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        dump.insert(key, value);
    }

    Ok(dump)
}

/// Strings are written as-is, everything else as JSON text.
pub fn encode_value(value: &Value) -> Result<String> {
    match value {
        Value::String(raw) => Ok(raw.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

pub struct ExportImport {
    store: SharedStore,
    migrator: Arc<VersionMigrator>,
    events: EventLog,
}

impl ExportImport {
    pub fn new(store: SharedStore, migrator: Arc<VersionMigrator>, events: EventLog) -> Self {
        Self {
            store,
            migrator,
            events,
        }
    }

    pub fn try_export_all(&self) -> Result<Dump> {
        export_entries(self.store.as_ref())
    }

    pub fn export_all(&self) -> Dump {
        self.try_export_all().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to export storage data");
            Dump::new()
        })
    }

    /// Write every entry of `dump`, then restamp the version record.
    ///
    /// Not atomic: entries written before a failure stay written.
    pub fn try_import_all(&self, dump: &Dump) -> Result<usize> {
        let mut written = 0;

        for (key, value) in dump {
            let outcome = encode_value(value)
                .and_then(|raw| self.store.set(key, &raw).map_err(IntegrityError::from));

            if let Err(e) = outcome {
                return Err(IntegrityError::Import {
                    key: key.clone(),
                    written,
                    reason: e.to_string(),
                });
            }
            written += 1;
        }

        let digest = checksum(&serde_json::to_string(dump)?);
        self.migrator.try_set_version(digest)?;

        self.events.append(
            StorageEvent::new(
                StorageEventType::MigrationNeeded,
                format!("Imported {} entries", written),
            )
            .with_data(serde_json::json!({ "entries": written })),
        );

        tracing::info!(entries = written, "Imported storage data");

        Ok(written)
    }

    pub fn import_all(&self, dump: &Dump) -> bool {
        match self.try_import_all(dump) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Storage import failed");
                false
            }
        }
    }

    /// Remove every entry and start over with a fresh version record.
    pub fn try_clear_all(&self) -> Result<()> {
        self.store.clear()?;
        self.migrator.try_set_version(checksum(""))?;

        self.events.append(StorageEvent::new(
            StorageEventType::MigrationNeeded,
            "All storage data cleared",
        ));

        tracing::info!("Cleared all storage data");

        Ok(())
    }

    pub fn clear_all(&self) {
        if let Err(e) = self.try_clear_all() {
            tracing::warn!(error = %e, "Failed to clear storage data");
        }
    }
}
