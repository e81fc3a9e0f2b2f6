//! Integrity layer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use scantosplit_health::{
    RepairPolicy, CURRENT_VERSION, DEFAULT_ESTIMATE_TIMEOUT, DEFAULT_QUOTA_BYTES,
};

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Total assumed when the platform reports no quota
    pub fallback_quota_bytes: u64,
    /// Upper bound on waiting for the platform estimate
    pub estimate_timeout_ms: u64,
    /// What a health check does with corrupted entries
    pub repair_policy: RepairPolicy,
    /// Schema version this build writes
    pub schema_version: String,
    /// Advertise IndexedDB support when no platform is injected
    pub indexed_db: bool,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("storage.db"),
            fallback_quota_bytes: DEFAULT_QUOTA_BYTES,
            estimate_timeout_ms: DEFAULT_ESTIMATE_TIMEOUT.as_millis() as u64,
            repair_policy: RepairPolicy::Delete,
            schema_version: CURRENT_VERSION.to_string(),
            indexed_db: false,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("ScanToSplit"))
            .unwrap_or_else(|| PathBuf::from(".scantosplit"))
    }

    /// Load a JSON config file; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fallback_quota_bytes == 0 {
            return Err(CoreError::Config(
                "fallback_quota_bytes must be greater than zero".to_string(),
            ));
        }
        if self.estimate_timeout_ms == 0 {
            return Err(CoreError::Config(
                "estimate_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.schema_version.trim().is_empty() {
            return Err(CoreError::Config("schema_version cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn estimate_timeout(&self) -> Duration {
        Duration::from_millis(self.estimate_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}
