//! Full-store health checks and corruption repair

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::corruption::validate_value;
use crate::error::IntegrityError;
use crate::events::EventLog;
use crate::platform::StoragePlatform;
use crate::quota::QuotaMonitor;
use crate::types::{
    QuotaStatus, StorageEvent, StorageEventType, StorageHealth, StorageQuota, HEALTH_KEY,
    QUARANTINE_PREFIX,
};
use crate::version::VersionMigrator;
use crate::{Result, SharedStore};

/// What happens to an entry that fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairPolicy {
    /// Drop it. Irreversible.
    #[default]
    Delete,
    /// Move the raw value under the quarantine prefix, then drop it. Falls
    /// back to `Delete` when the shadow copy cannot be written.
    Quarantine,
}

impl RepairPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairPolicy::Delete => "delete",
            RepairPolicy::Quarantine => "quarantine",
        }
    }
}

/// A corrupted value kept for forensic recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedEntry {
    pub key: String,
    pub value: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub quarantined_at: DateTime<Utc>,
}

pub struct HealthChecker {
    store: SharedStore,
    quota: Arc<QuotaMonitor>,
    migrator: Arc<VersionMigrator>,
    events: EventLog,
    platform: Option<Arc<dyn StoragePlatform>>,
    policy: RepairPolicy,
}

impl HealthChecker {
    pub fn new(
        store: SharedStore,
        quota: Arc<QuotaMonitor>,
        migrator: Arc<VersionMigrator>,
        events: EventLog,
    ) -> Self {
        Self {
            store,
            quota,
            migrator,
            events,
            platform: None,
            policy: RepairPolicy::default(),
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn StoragePlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RepairPolicy {
        self.policy
    }

    pub async fn try_check(&self) -> Result<StorageHealth> {
        let quota = self.quota.get_quota().await;
        self.try_scan(quota)
    }

    /// Run a full check. Never fails: if the store cannot be scanned the
    /// last persisted report, or a report with only the quota, is returned.
    pub async fn check(&self) -> StorageHealth {
        let quota = self.quota.get_quota().await;
        self.scan(quota)
    }

    /// The synchronous part of a check, given an already computed quota.
    pub fn scan(&self, quota: StorageQuota) -> StorageHealth {
        match self.try_scan(quota.clone()) {
            Ok(health) => health,
            Err(e) => {
                tracing::error!(error = %e, "Storage health check failed");
                self.get_last_report().unwrap_or_else(|| StorageHealth {
                    quota,
                    item_count: 0,
                    corrupted_keys: Vec::new(),
                    last_check: Utc::now(),
                    version: self.current_version_label(),
                    supports_indexed_db: self.supports_indexed_db(),
                })
            }
        }
    }

    pub fn try_scan(&self, quota: StorageQuota) -> Result<StorageHealth> {
        self.record_quota_pressure(&quota);

        let keys = self.store.keys()?;
        let item_count = keys.len();

        let mut suspects = Vec::new();
        for key in keys {
            let raw = self.store.get(&key)?;
            if let Err(e) = validate_value(&key, raw.as_deref()) {
                tracing::debug!(key = %key, error = %e, "Corrupted entry");
                suspects.push((key, raw));
            }
        }

        let mut corrupted_keys = Vec::with_capacity(suspects.len());
        let mut unrepaired = Vec::new();
        for (key, observed) in suspects {
            match self.repair(&key, observed.as_deref()) {
                Ok(true) => corrupted_keys.push(key),
                Ok(false) => {
                    tracing::warn!(key = %key, "Entry rewritten during check, left in place");
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Failed to repair corrupted entry");
                    corrupted_keys.push(key.clone());
                    unrepaired.push(key);
                }
            }
        }

        if !corrupted_keys.is_empty() {
            let message = if unrepaired.is_empty() {
                format!(
                    "Found and repaired {} corrupted item(s): {}",
                    corrupted_keys.len(),
                    corrupted_keys.join(", ")
                )
            } else {
                format!(
                    "Found {} corrupted item(s), {} left in place: {}",
                    corrupted_keys.len(),
                    unrepaired.len(),
                    unrepaired.join(", ")
                )
            };

            self.events.append(
                StorageEvent::new(StorageEventType::CorruptionDetected, message).with_data(
                    serde_json::json!({
                        "keys": corrupted_keys,
                        "unrepaired": unrepaired,
                        "policy": self.policy.as_str(),
                    }),
                ),
            );
        }

        let health = StorageHealth {
            quota,
            item_count,
            corrupted_keys,
            last_check: Utc::now(),
            version: self.current_version_label(),
            supports_indexed_db: self.supports_indexed_db(),
        };

        if let Err(e) = self.persist(&health) {
            tracing::warn!(error = %e, "Failed to persist health report");
        }

        tracing::info!(
            items = health.item_count,
            corrupted = health.corrupted_keys.len(),
            status = %health.quota.status,
            "Storage health check complete"
        );

        Ok(health)
    }

    /// Read the last persisted report. Does not repair a damaged one.
    pub fn get_last_report(&self) -> Option<StorageHealth> {
        let raw = self.store.get(HEALTH_KEY).ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// Every quarantined copy, oldest first. A key corrupted more than once
    /// has one copy per repair.
    pub fn quarantined(&self) -> Vec<QuarantinedEntry> {
        match self.shadows() {
            Ok(shadows) => shadows.into_iter().map(|(_, entry)| entry).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list quarantined entries");
                Vec::new()
            }
        }
    }

    /// Put the most recent quarantined copy of `key` back under its original
    /// key. Older copies stay quarantined.
    pub fn try_restore_quarantined(&self, key: &str) -> Result<()> {
        let (shadow, entry) = self
            .shadows()?
            .into_iter()
            .rev()
            .find(|(_, entry)| entry.key == key)
            .ok_or_else(|| IntegrityError::NotQuarantined(key.to_string()))?;

        self.store.set(&entry.key, &entry.value)?;
        self.store.remove(&shadow)?;

        tracing::info!(key = %key, shadow = %shadow, "Restored quarantined entry");
        Ok(())
    }

    /// Shadow entries with their store keys, ordered by quarantine time.
    fn shadows(&self) -> Result<Vec<(String, QuarantinedEntry)>> {
        let mut shadows = Vec::new();
        for shadow in self.store.keys()? {
            if !shadow.starts_with(QUARANTINE_PREFIX) {
                continue;
            }
            let Some(raw) = self.store.get(&shadow)? else {
                continue;
            };
            match serde_json::from_str::<QuarantinedEntry>(&raw) {
                Ok(entry) => shadows.push((shadow, entry)),
                Err(e) => tracing::debug!(key = %shadow, error = %e, "Skipping foreign shadow"),
            }
        }
        shadows.sort_by_key(|(_, entry)| entry.quarantined_at);
        Ok(shadows)
    }

    /// Repair one entry if it still holds the value that failed validation.
    /// Returns `false` when the entry changed in the meantime.
    fn repair(&self, key: &str, observed: Option<&str>) -> Result<bool> {
        let current = self.store.get(key)?;
        if current.as_deref() != observed {
            return Ok(false);
        }

        if let (RepairPolicy::Quarantine, Some(raw)) = (self.policy, observed) {
            if let Err(e) = self.quarantine(key, raw) {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Quarantine copy not written, deleting corrupted entry"
                );
            }
        }

        self.store.remove(key)?;
        Ok(true)
    }

    /// Write a shadow copy under a key of its own, so earlier copies of the
    /// same entry are kept.
    fn quarantine(&self, key: &str, raw: &str) -> Result<()> {
        let mut quarantined_at = Utc::now();
        let mut shadow = quarantine_key(key, &quarantined_at);
        while self.store.contains(&shadow)? {
            quarantined_at += chrono::Duration::milliseconds(1);
            shadow = quarantine_key(key, &quarantined_at);
        }

        let entry = QuarantinedEntry {
            key: key.to_string(),
            value: raw.to_string(),
            quarantined_at,
        };
        self.store.set(&shadow, &serde_json::to_string(&entry)?)?;
        Ok(())
    }

    fn record_quota_pressure(&self, quota: &StorageQuota) {
        let kind = match quota.status {
            QuotaStatus::Healthy => return,
            QuotaStatus::Warning => StorageEventType::QuotaWarning,
            QuotaStatus::Critical | QuotaStatus::Full => StorageEventType::QuotaCritical,
        };

        self.events.append(
            StorageEvent::new(
                kind,
                format!("Storage is {:.1}% full ({})", quota.percentage, quota.status),
            )
            .with_data(serde_json::json!({
                "used": quota.used,
                "total": quota.total,
            })),
        );
    }

    fn persist(&self, health: &StorageHealth) -> Result<()> {
        self.store.set(HEALTH_KEY, &serde_json::to_string(health)?)?;
        Ok(())
    }

    fn current_version_label(&self) -> String {
        self.migrator
            .get_version()
            .map(|record| record.version)
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn supports_indexed_db(&self) -> bool {
        self.platform
            .as_ref()
            .map(|p| p.supports_indexed_db())
            .unwrap_or(false)
    }
}

fn quarantine_key(key: &str, at: &DateTime<Utc>) -> String {
    format!("{}{}@{}", QUARANTINE_PREFIX, key, at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FixedPlatform;
    use crate::types::{is_reserved, CURRENT_VERSION, EVENTS_KEY, VERSION_KEY};
    use scantosplit_storage::{KeyValueStore, MemoryStore, StorageError};

    fn checker(store: SharedStore, policy: RepairPolicy) -> HealthChecker {
        let events = EventLog::new(store.clone());
        let platform: Arc<dyn StoragePlatform> =
            Arc::new(FixedPlatform::unavailable().indexed_db(true));
        let quota = Arc::new(
            QuotaMonitor::new(store.clone(), events.clone()).with_platform(platform.clone()),
        );
        let migrator = Arc::new(VersionMigrator::new(store.clone(), events.clone()));
        HealthChecker::new(store, quota, migrator, events)
            .with_platform(platform)
            .with_policy(policy)
    }

    #[tokio::test]
    async fn test_check_repairs_corrupted_entry() {
        let store = MemoryStore::new();
        store.set("a", r#"{"x":1}"#).unwrap();
        store.set("b", "not-json").unwrap();

        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);
        let health = checker.check().await;

        assert!(health.item_count >= 2);
        assert_eq!(health.corrupted_keys, vec!["b".to_string()]);
        assert!(store.get("b").unwrap().is_none());

        let a: serde_json::Value =
            serde_json::from_str(&store.get("a").unwrap().unwrap()).unwrap();
        assert_eq!(a, serde_json::json!({ "x": 1 }));

        assert!(health.supports_indexed_db);
        assert_eq!(health.quota.status, QuotaStatus::Healthy);

        let events = EventLog::new(Arc::new(store.clone())).list();
        let corruption: Vec<_> = events
            .iter()
            .filter(|e| e.kind == StorageEventType::CorruptionDetected)
            .collect();
        assert_eq!(corruption.len(), 1);
        assert_eq!(corruption[0].data.as_ref().unwrap()["keys"][0], "b");
    }

    #[tokio::test]
    async fn test_clean_store_records_no_corruption() {
        let store = MemoryStore::new();
        store.set("a", "[]").unwrap();

        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);
        let health = checker.check().await;

        assert!(health.corrupted_keys.is_empty());
        assert_eq!(health.item_count, 1);
        assert_eq!(health.version, "unknown");
        assert!(store.get(EVENTS_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_is_persisted() {
        let store = MemoryStore::new();
        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);
        assert!(checker.get_last_report().is_none());

        checker.migrator.set_version("0".to_string());
        let health = checker.check().await;

        let last = checker.get_last_report().unwrap();
        assert_eq!(last.item_count, health.item_count);
        assert_eq!(last.version, CURRENT_VERSION);
        assert_eq!(
            last.last_check.timestamp_millis(),
            health.last_check.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_damaged_report_reads_as_none() {
        let store = MemoryStore::new();
        store.set(HEALTH_KEY, "{truncated").unwrap();
        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);

        assert!(checker.get_last_report().is_none());
        // Reading did not repair it
        assert_eq!(store.get(HEALTH_KEY).unwrap().as_deref(), Some("{truncated"));

        // A full check does, and counts it
        let health = checker.check().await;
        assert!(health.corrupted_keys.contains(&HEALTH_KEY.to_string()));
        assert!(checker.get_last_report().is_some());
    }

    #[tokio::test]
    async fn test_quarantine_policy() {
        let store = MemoryStore::new();
        store.set("bills", "{\"broken").unwrap();

        let checker = checker(Arc::new(store.clone()), RepairPolicy::Quarantine);
        let health = checker.check().await;
        assert_eq!(health.corrupted_keys, vec!["bills".to_string()]);
        assert!(store.get("bills").unwrap().is_none());

        let quarantined = checker.quarantined();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].key, "bills");
        assert_eq!(quarantined[0].value, "{\"broken");

        // The shadow entry is valid JSON and survives the next check
        let again = checker.check().await;
        assert!(again.corrupted_keys.is_empty());

        checker.try_restore_quarantined("bills").unwrap();
        assert_eq!(store.get("bills").unwrap().as_deref(), Some("{\"broken"));
        assert!(checker.quarantined().is_empty());
        assert!(matches!(
            checker.try_restore_quarantined("bills"),
            Err(IntegrityError::NotQuarantined(_))
        ));
    }

    #[tokio::test]
    async fn test_quarantine_keeps_every_copy() {
        let store = MemoryStore::new();
        let checker = checker(Arc::new(store.clone()), RepairPolicy::Quarantine);

        store.set("bills", "{first").unwrap();
        checker.check().await;
        store.set("bills", "{second").unwrap();
        checker.check().await;

        let values: Vec<_> = checker.quarantined().into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec!["{first", "{second"]);

        // Newest copy comes back first, the older one stays aside
        checker.try_restore_quarantined("bills").unwrap();
        assert_eq!(store.get("bills").unwrap().as_deref(), Some("{second"));
        let left = checker.quarantined();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].value, "{first");
    }

    #[tokio::test]
    async fn test_quarantine_falls_back_to_delete_when_full() {
        // Exactly room for the corrupted entry and nothing else
        let store = MemoryStore::with_capacity_bytes(40);
        store.set("bills", "{broken-value-x").unwrap();

        let checker = checker(Arc::new(store.clone()), RepairPolicy::Quarantine);
        let health = checker.check().await;
        assert_eq!(health.corrupted_keys, vec!["bills".to_string()]);
        assert!(store.get("bills").unwrap().is_none());
        assert!(checker.quarantined().is_empty());

        let again = checker.check().await;
        assert!(again.corrupted_keys.is_empty());
        assert!(store.get("bills").unwrap().is_none());
    }

    #[test]
    fn test_repair_skips_rewritten_entry() {
        let store = MemoryStore::new();
        store.set("draft", "fresh").unwrap();
        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);

        // Validation saw "stale", a writer has since stored "fresh"
        assert!(!checker.repair("draft", Some("stale")).unwrap());
        assert_eq!(store.get("draft").unwrap().as_deref(), Some("fresh"));

        assert!(checker.repair("draft", Some("fresh")).unwrap());
        assert!(store.get("draft").unwrap().is_none());
    }

    #[test]
    fn test_quota_pressure_events() {
        let store = MemoryStore::new();
        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);

        checker.scan(StorageQuota::new(85, 100));
        checker.scan(StorageQuota::new(97, 100));
        checker.scan(StorageQuota::new(10, 100));

        let kinds: Vec<_> = EventLog::new(Arc::new(store.clone()))
            .list()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![StorageEventType::QuotaWarning, StorageEventType::QuotaCritical]
        );
    }

    #[tokio::test]
    async fn test_only_reserved_keys_are_written() {
        let store = MemoryStore::new();
        store.set("bills", "[1,2]").unwrap();
        store.set("broken", "nope").unwrap();

        let checker = checker(Arc::new(store.clone()), RepairPolicy::Delete);
        checker.migrator.needs_migration();
        checker.check().await;

        let keys = store.keys().unwrap();
        for key in &keys {
            assert!(key == "bills" || is_reserved(key), "unexpected key {}", key);
        }
        assert!(keys.contains(&VERSION_KEY.to_string()));
        assert!(keys.contains(&HEALTH_KEY.to_string()));
        assert!(keys.contains(&EVENTS_KEY.to_string()));
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> scantosplit_storage::Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> scantosplit_storage::Result<()> {
            Err(StorageError::Io(std::io::Error::other("read-only")))
        }

        fn remove(&self, _key: &str) -> scantosplit_storage::Result<()> {
            Ok(())
        }

        fn clear(&self) -> scantosplit_storage::Result<()> {
            Ok(())
        }

        fn keys(&self) -> scantosplit_storage::Result<Vec<String>> {
            Err(StorageError::Io(std::io::Error::other("unavailable")))
        }
    }

    /// Accepts writes but refuses to delete anything.
    struct UndeletableStore(MemoryStore);

    impl KeyValueStore for UndeletableStore {
        fn get(&self, key: &str) -> scantosplit_storage::Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> scantosplit_storage::Result<()> {
            self.0.set(key, value)
        }

        fn remove(&self, _key: &str) -> scantosplit_storage::Result<()> {
            Err(StorageError::Io(std::io::Error::other("locked")))
        }

        fn clear(&self) -> scantosplit_storage::Result<()> {
            self.0.clear()
        }

        fn keys(&self) -> scantosplit_storage::Result<Vec<String>> {
            self.0.keys()
        }
    }

    #[tokio::test]
    async fn test_failed_repair_is_not_reported_repaired() {
        let store = MemoryStore::new();
        store.set("bills", "nope").unwrap();
        store.set("notes", "[]").unwrap();

        let checker = checker(Arc::new(UndeletableStore(store.clone())), RepairPolicy::Delete);
        let health = checker.check().await;

        // Still corrupted, still there
        assert_eq!(health.corrupted_keys, vec!["bills".to_string()]);
        assert_eq!(store.get("bills").unwrap().as_deref(), Some("nope"));

        let events = EventLog::new(Arc::new(store.clone())).list();
        let corruption = events
            .iter()
            .find(|e| e.kind == StorageEventType::CorruptionDetected)
            .unwrap();
        assert!(!corruption.message.contains("repaired"));
        assert!(corruption.message.contains("left in place"));
        assert_eq!(corruption.data.as_ref().unwrap()["unrepaired"][0], "bills");

        // A later check finds it again
        let again = checker.check().await;
        assert_eq!(again.corrupted_keys, vec!["bills".to_string()]);
    }

    #[tokio::test]
    async fn test_unscannable_store_degrades() {
        let checker = checker(Arc::new(BrokenStore), RepairPolicy::Delete);

        assert!(checker.try_check().await.is_err());

        let health = checker.check().await;
        assert_eq!(health.item_count, 0);
        assert!(health.corrupted_keys.is_empty());
        assert_eq!(health.quota.used, 0);
    }
}
