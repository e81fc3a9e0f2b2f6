//! Schema version tracking and data migration

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::corruption::checksum;
use crate::error::IntegrityError;
use crate::events::EventLog;
use crate::transfer::{encode_value, export_entries, Dump};
use crate::types::{
    is_reserved, DataVersionRecord, StorageEvent, StorageEventType, CURRENT_VERSION, VERSION_KEY,
};
use crate::{Result, SharedStore};

pub type TransformResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Transform = Box<dyn Fn(&mut Dump) -> TransformResult + Send + Sync>;

/// One link of the migration chain.
///
/// The transform receives the full exported document and must be pure and
/// idempotent over it.
pub struct MigrationStep {
    from: String,
    to: String,
    transform: Transform,
}

impl MigrationStep {
    pub fn new<F>(from: impl Into<String>, to: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&mut Dump) -> TransformResult + Send + Sync + 'static,
    {
        Self {
            from: from.into(),
            to: to.into(),
            transform: Box::new(transform),
        }
    }

    pub fn from_version(&self) -> &str {
        &self.from
    }

    pub fn to_version(&self) -> &str {
        &self.to
    }
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub from: String,
    pub to: String,
    pub steps_applied: Vec<String>,
    pub entries_rewritten: usize,
}

pub struct VersionMigrator {
    store: SharedStore,
    events: EventLog,
    current: String,
    steps: Vec<MigrationStep>,
    /// Last timestamp issued, in epoch millis. Survives a cleared store.
    last_stamp: Mutex<Option<i64>>,
}

impl VersionMigrator {
    pub fn new(store: SharedStore, events: EventLog) -> Self {
        Self {
            store,
            events,
            current: CURRENT_VERSION.to_string(),
            steps: Vec::new(),
            last_stamp: Mutex::new(None),
        }
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current = version.into();
        self
    }

    /// Append a link to the chain.
    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current
    }

    pub fn try_get_version(&self) -> Result<Option<DataVersionRecord>> {
        match self.store.get(VERSION_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| IntegrityError::Parse {
                    key: VERSION_KEY.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Like `try_get_version`, but a record that no longer parses counts as
    /// absent so callers can stamp a fresh one over it.
    fn readable_version(&self) -> Result<Option<DataVersionRecord>> {
        match self.try_get_version() {
            Err(IntegrityError::Parse { source, .. }) => {
                tracing::warn!(error = %source, "Discarding unreadable version record");
                Ok(None)
            }
            other => other,
        }
    }

    pub fn get_version(&self) -> Option<DataVersionRecord> {
        self.try_get_version().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Version record unreadable");
            None
        })
    }

    /// Stamp the store with the current version. Timestamps strictly
    /// increase across calls, at millisecond resolution.
    pub fn try_set_version(&self, checksum: String) -> Result<DataVersionRecord> {
        let previous = self
            .get_version()
            .map(|record| record.timestamp.timestamp_millis());

        let mut last_stamp = self.last_stamp.lock();
        let floor = previous.into_iter().chain(*last_stamp).max();
        let now = Utc::now().timestamp_millis();
        let millis = match floor {
            Some(floor) if now <= floor => floor + 1,
            _ => now,
        };

        let record = DataVersionRecord {
            version: self.current.clone(),
            timestamp: DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now),
            checksum,
        };

        self.store
            .set(VERSION_KEY, &serde_json::to_string(&record)?)?;
        *last_stamp = Some(millis);

        tracing::debug!(
            version = %record.version,
            checksum = %record.checksum,
            "Version record written"
        );

        Ok(record)
    }

    pub fn set_version(&self, checksum: String) {
        if let Err(e) = self.try_set_version(checksum) {
            tracing::warn!(error = %e, "Failed to write version record");
        }
    }

    /// On first run there is no record: one is created and no migration is
    /// reported. An unreadable record is replaced the same way. Otherwise any
    /// difference from the current version counts.
    pub fn try_needs_migration(&self) -> Result<bool> {
        match self.readable_version()? {
            Some(record) => Ok(record.version != self.current),
            None => {
                self.try_set_version(checksum(""))?;
                tracing::info!(version = %self.current, "Initialized version record");
                Ok(false)
            }
        }
    }

    pub fn needs_migration(&self) -> bool {
        self.try_needs_migration().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not determine migration state");
            false
        })
    }

    /// Walk the chain from the stored version to the current one.
    ///
    /// `Ok(None)` when there is no readable version record. On failure
    /// nothing is written and the version record is left as it was.
    pub fn try_migrate(&self) -> Result<Option<MigrationOutcome>> {
        let record = match self.readable_version()? {
            Some(record) => record,
            None => return Ok(None),
        };

        let original = export_entries(self.store.as_ref())?;
        let mut dump = original.clone();
        let steps_applied = self.apply_chain(&record.version, &mut dump)?;
        let entries_rewritten = self.write_back(&original, &dump)?;

        let digest = checksum(&serde_json::to_string(&dump)?);
        self.try_set_version(digest)?;

        let outcome = MigrationOutcome {
            from: record.version,
            to: self.current.clone(),
            steps_applied,
            entries_rewritten,
        };

        self.events.append(
            StorageEvent::new(
                StorageEventType::MigrationNeeded,
                format!("Migrated data from version {} to {}", outcome.from, outcome.to),
            )
            .with_data(serde_json::to_value(&outcome)?),
        );

        tracing::info!(
            from = %outcome.from,
            to = %outcome.to,
            steps = outcome.steps_applied.len(),
            rewritten = outcome.entries_rewritten,
            "Migrated storage data"
        );

        Ok(Some(outcome))
    }

    pub fn migrate(&self) -> bool {
        match self.try_migrate() {
            Ok(outcome) => outcome.is_some(),
            Err(e) => {
                tracing::error!(error = %e, "Storage migration failed");
                false
            }
        }
    }

    fn apply_chain(&self, from: &str, dump: &mut Dump) -> Result<Vec<String>> {
        let mut position = from.to_string();
        let mut applied = Vec::new();

        while position != self.current {
            if applied.len() >= self.steps.len() {
                tracing::warn!(position = %position, "Migration chain does not converge");
                break;
            }

            let Some(step) = self.steps.iter().find(|s| s.from == position) else {
                tracing::warn!(
                    from = %position,
                    to = %self.current,
                    "No migration registered, advancing version without transform"
                );
                break;
            };

            (step.transform)(dump).map_err(|e| IntegrityError::Migration {
                from: step.from.clone(),
                to: step.to.clone(),
                reason: e.to_string(),
            })?;

            applied.push(format!("{} -> {}", step.from, step.to));
            position = step.to.clone();
        }

        Ok(applied)
    }

    /// Persist entries a transform changed, added or dropped. Reserved keys
    /// stay under this layer's control and are never rewritten here.
    fn write_back(&self, original: &Dump, migrated: &Dump) -> Result<usize> {
        let mut rewritten = 0;

        for (key, value) in migrated {
            if is_reserved(key) || original.get(key) == Some(value) {
                continue;
            }
            self.store.set(key, &encode_value(value)?)?;
            rewritten += 1;
        }

        for key in original.keys() {
            if !is_reserved(key) && !migrated.contains_key(key) {
                self.store.remove(key)?;
                rewritten += 1;
            }
        }

        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scantosplit_storage::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn migrator(store: &MemoryStore) -> VersionMigrator {
        let shared: SharedStore = Arc::new(store.clone());
        VersionMigrator::new(shared.clone(), EventLog::new(shared))
    }

    fn force_version(store: &MemoryStore, version: &str) {
        let record = DataVersionRecord {
            version: version.to_string(),
            timestamp: Utc::now(),
            checksum: checksum(""),
        };
        store
            .set(VERSION_KEY, &serde_json::to_string(&record).unwrap())
            .unwrap();
    }

    #[test]
    fn test_first_run_initializes_record() {
        let store = MemoryStore::new();
        let migrator = migrator(&store);

        assert!(migrator.get_version().is_none());
        assert!(!migrator.needs_migration());

        let record = migrator.get_version().unwrap();
        assert_eq!(record.version, CURRENT_VERSION);
        assert_eq!(record.checksum, "0");
    }

    #[test]
    fn test_needs_migration_on_version_mismatch() {
        let store = MemoryStore::new();
        let migrator = migrator(&store);

        migrator.set_version(checksum(""));
        assert!(!migrator.needs_migration());

        force_version(&store, "0.9.0");
        assert!(migrator.needs_migration());

        // Plain string comparison, not semver ordering
        force_version(&store, "1.0");
        assert!(migrator.needs_migration());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let store = MemoryStore::new();
        let migrator = migrator(&store);

        let mut last = migrator.try_set_version("a".to_string()).unwrap().timestamp;
        for _ in 0..20 {
            let next = migrator.try_set_version("b".to_string()).unwrap().timestamp;
            assert!(next > last);
            last = next;
        }

        // Still increasing after the record is wiped
        store.clear().unwrap();
        let after_clear = migrator.try_set_version("c".to_string()).unwrap().timestamp;
        assert!(after_clear > last);
    }

    #[test]
    fn test_migrate_without_record() {
        let store = MemoryStore::new();
        let migrator = migrator(&store);

        assert!(!migrator.migrate());
        assert!(migrator.get_version().is_none());
    }

    #[test]
    fn test_corrupt_record_is_reinitialized() {
        let store = MemoryStore::new();
        store.set("bills", "[]").unwrap();
        store.set(VERSION_KEY, "{garbage").unwrap();
        let migrator = migrator(&store);

        assert!(migrator.get_version().is_none());
        assert!(matches!(
            migrator.try_get_version(),
            Err(IntegrityError::Parse { ref key, .. }) if key == VERSION_KEY
        ));

        // Nothing to migrate from, and the corrupt record is left for
        // needs_migration to replace
        assert!(!migrator.migrate());
        assert_eq!(store.get(VERSION_KEY).unwrap().as_deref(), Some("{garbage"));
        assert_eq!(store.get("bills").unwrap().as_deref(), Some("[]"));

        assert!(!migrator.needs_migration());
        let record = migrator.try_get_version().unwrap().unwrap();
        assert_eq!(record.version, CURRENT_VERSION);
        assert_eq!(record.checksum, "0");

        assert!(!migrator.needs_migration());
        force_version(&store, "0.9.0");
        assert!(migrator.needs_migration());
    }

    #[test]
    fn test_migrate_applies_chain() {
        let store = MemoryStore::new();
        store.set("bills", r#"[{"amount":10}]"#).unwrap();
        store.set("legacy-flag", "true").unwrap();
        store.set("note", "plain text").unwrap();

        let shared: SharedStore = Arc::new(store.clone());
        let migrator = VersionMigrator::new(shared.clone(), EventLog::new(shared))
            .with_current_version("3")
            .with_step(MigrationStep::new("1", "2", |dump: &mut Dump| {
                if let Some(bills) = dump.get_mut("bills").and_then(|b| b.as_array_mut()) {
                    for bill in bills {
                        if let Some(obj) = bill.as_object_mut() {
                            obj.entry("currency").or_insert(serde_json::json!("USD"));
                        }
                    }
                }
                Ok(())
            }))
            .with_step(MigrationStep::new("2", "3", |dump: &mut Dump| {
                dump.remove("legacy-flag");
                Ok(())
            }));

        force_version(&store, "1");
        assert!(migrator.needs_migration());

        let outcome = migrator.try_migrate().unwrap().unwrap();
        assert_eq!(outcome.from, "1");
        assert_eq!(outcome.to, "3");
        assert_eq!(outcome.steps_applied, vec!["1 -> 2", "2 -> 3"]);
        assert_eq!(outcome.entries_rewritten, 2);

        let bills: serde_json::Value =
            serde_json::from_str(&store.get("bills").unwrap().unwrap()).unwrap();
        assert_eq!(bills[0]["currency"], "USD");
        assert_eq!(bills[0]["amount"], 10);
        assert!(store.get("legacy-flag").unwrap().is_none());
        // Raw strings survive untouched
        assert_eq!(store.get("note").unwrap().as_deref(), Some("plain text"));

        assert!(!migrator.needs_migration());
        let events = EventLog::new(Arc::new(store.clone())).list();
        let last = events.last().unwrap();
        assert_eq!(last.kind, StorageEventType::MigrationNeeded);
        assert_eq!(last.data.as_ref().unwrap()["stepsApplied"][1], "2 -> 3");
    }

    #[test]
    fn test_migrate_without_registered_step_advances() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        let migrator = migrator(&store);

        force_version(&store, "0.1.0");
        let outcome = migrator.try_migrate().unwrap().unwrap();
        assert!(outcome.steps_applied.is_empty());
        assert_eq!(outcome.entries_rewritten, 0);
        assert_eq!(migrator.get_version().unwrap().version, CURRENT_VERSION);
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_failed_migration_leaves_version() {
        let store = MemoryStore::new();
        store.set("bills", "[]").unwrap();

        let shared: SharedStore = Arc::new(store.clone());
        let migrator = VersionMigrator::new(shared.clone(), EventLog::new(shared))
            .with_current_version("2")
            .with_step(MigrationStep::new("1", "2", |dump: &mut Dump| {
                dump.insert("bills".to_string(), serde_json::json!("half done"));
                Err("bill schema mismatch".into())
            }));

        force_version(&store, "1");
        let before = store.get(VERSION_KEY).unwrap();

        assert!(matches!(
            migrator.try_migrate(),
            Err(IntegrityError::Migration { ref from, ref to, .. }) if from == "1" && to == "2"
        ));
        assert!(!migrator.migrate());

        assert_eq!(store.get(VERSION_KEY).unwrap(), before);
        assert_eq!(store.get("bills").unwrap().as_deref(), Some("[]"));
        assert!(migrator.needs_migration());
    }

    #[test]
    fn test_cyclic_chain_terminates() {
        let store = MemoryStore::new();
        let shared: SharedStore = Arc::new(store.clone());
        let migrator = VersionMigrator::new(shared.clone(), EventLog::new(shared))
            .with_current_version("9")
            .with_step(MigrationStep::new("a", "b", |_: &mut Dump| Ok(())))
            .with_step(MigrationStep::new("b", "a", |_: &mut Dump| Ok(())));

        force_version(&store, "a");
        let outcome = migrator.try_migrate().unwrap().unwrap();
        assert_eq!(outcome.steps_applied.len(), 2);
        assert_eq!(migrator.get_version().unwrap().version, "9");
    }
}
