//! Storage integrity facade
//!
//! Wires the quota monitor, corruption repair, version migrator and
//! backup components around one shared store, and exposes the operations
//! the application calls.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use scantosplit_health::{
    DataVersionRecord, Dump, EventLog, ExportImport, FixedPlatform, HealthChecker,
    MigrationOutcome, MigrationStep, QuarantinedEntry, QuotaMonitor, SharedStore, StorageEvent,
    StorageHealth, StoragePlatform, StorageQuota, VersionMigrator,
};
use scantosplit_storage::{Database, MemoryStore};

use crate::config::Config;
use crate::Result;

/// Central handle over persisted state.
///
/// Clones share the same store and components. Mutating compound
/// operations are serialised within the process; nothing coordinates with
/// other processes writing the same store.
pub struct StorageIntegrity {
    config: Config,
    store: SharedStore,
    events: EventLog,
    quota: Arc<QuotaMonitor>,
    migrator: Arc<VersionMigrator>,
    checker: Arc<HealthChecker>,
    transfer: Arc<ExportImport>,
    write_lock: Arc<Mutex<()>>,
}

impl StorageIntegrity {
    /// Open the SQLite-backed store at the configured path
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.database_path)?;

        tracing::info!(path = ?config.database_path, "Opened storage database");

        Ok(Self::new(Arc::new(db), config))
    }

    pub fn in_memory(config: Config) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Use `store` with no platform estimate; quota comes from the local
    /// estimate.
    pub fn new(store: SharedStore, config: Config) -> Self {
        let platform = Arc::new(FixedPlatform::unavailable().indexed_db(config.indexed_db));
        Self::with_components(store, config, platform, Vec::new())
    }

    pub fn with_components(
        store: SharedStore,
        config: Config,
        platform: Arc<dyn StoragePlatform>,
        migrations: Vec<MigrationStep>,
    ) -> Self {
        let events = EventLog::new(store.clone());

        let quota = Arc::new(
            QuotaMonitor::new(store.clone(), events.clone())
                .with_platform(platform.clone())
                .with_fallback_total(config.fallback_quota_bytes)
                .with_estimate_timeout(config.estimate_timeout()),
        );

        let migrator = Arc::new(
            migrations.into_iter().fold(
                VersionMigrator::new(store.clone(), events.clone())
                    .with_current_version(config.schema_version.clone()),
                |migrator, step| migrator.with_step(step),
            ),
        );

        let checker = Arc::new(
            HealthChecker::new(store.clone(), quota.clone(), migrator.clone(), events.clone())
                .with_platform(platform)
                .with_policy(config.repair_policy),
        );

        let transfer = Arc::new(ExportImport::new(
            store.clone(),
            migrator.clone(),
            events.clone(),
        ));

        Self {
            config,
            store,
            events,
            quota,
            migrator,
            checker,
            transfer,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // === Quota ===

    pub async fn get_storage_quota(&self) -> StorageQuota {
        self.quota.get_quota().await
    }

    /// Trim the diagnostic log. Returns bytes freed.
    pub fn clear_old_data(&self) -> u64 {
        let _guard = self.write_lock.lock();
        self.quota.clear_old_data()
    }

    // === Health ===

    pub async fn check_storage_health(&self) -> StorageHealth {
        let quota = self.quota.get_quota().await;
        let _guard = self.write_lock.lock();
        self.checker.scan(quota)
    }

    pub async fn try_check_storage_health(&self) -> Result<StorageHealth> {
        let quota = self.quota.get_quota().await;
        let _guard = self.write_lock.lock();
        Ok(self.checker.try_scan(quota)?)
    }

    pub fn get_last_health_report(&self) -> Option<StorageHealth> {
        self.checker.get_last_report()
    }

    pub fn quarantined_entries(&self) -> Vec<QuarantinedEntry> {
        self.checker.quarantined()
    }

    pub fn restore_quarantined(&self, key: &str) -> bool {
        let _guard = self.write_lock.lock();
        match self.checker.try_restore_quarantined(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to restore quarantined entry");
                false
            }
        }
    }

    /// Run a health check every `period` until the returned task is aborted.
    pub fn spawn_periodic_check(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let integrity = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let health = integrity.check_storage_health().await;
                tracing::debug!(
                    items = health.item_count,
                    corrupted = health.corrupted_keys.len(),
                    status = %health.quota.status,
                    "Periodic storage health check"
                );
            }
        })
    }

    // === Versioning ===

    pub fn version_record(&self) -> Option<DataVersionRecord> {
        self.migrator.get_version()
    }

    pub fn needs_migration(&self) -> bool {
        let _guard = self.write_lock.lock();
        self.migrator.needs_migration()
    }

    pub async fn migrate_data(&self) -> bool {
        let _guard = self.write_lock.lock();
        self.migrator.migrate()
    }

    pub async fn try_migrate_data(&self) -> Result<Option<MigrationOutcome>> {
        let _guard = self.write_lock.lock();
        Ok(self.migrator.try_migrate()?)
    }

    // === Backup ===

    pub fn get_all_storage_data(&self) -> Dump {
        self.transfer.export_all()
    }

    pub fn import_storage_data(&self, dump: &Dump) -> bool {
        let _guard = self.write_lock.lock();
        self.transfer.import_all(dump)
    }

    pub fn try_import_storage_data(&self, dump: &Dump) -> Result<usize> {
        let _guard = self.write_lock.lock();
        Ok(self.transfer.try_import_all(dump)?)
    }

    pub fn clear_all_storage_data(&self) {
        let _guard = self.write_lock.lock();
        self.transfer.clear_all();
    }

    // === Diagnostics ===

    pub fn storage_events(&self) -> Vec<StorageEvent> {
        self.events.list()
    }
}

impl Clone for StorageIntegrity {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            quota: Arc::clone(&self.quota),
            migrator: Arc::clone(&self.migrator),
            checker: Arc::clone(&self.checker),
            transfer: Arc::clone(&self.transfer),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}
