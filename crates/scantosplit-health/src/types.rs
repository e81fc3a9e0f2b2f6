//! Persisted records and their JSON shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written by this build
pub const CURRENT_VERSION: &str = "1.0.0";

pub const VERSION_KEY: &str = "scantosplit-version";
pub const HEALTH_KEY: &str = "scantosplit-health";
pub const EVENTS_KEY: &str = "scantosplit-events";

/// Keys owned by this layer. Everything else is domain data.
pub const RESERVED_KEYS: [&str; 3] = [VERSION_KEY, HEALTH_KEY, EVENTS_KEY];

/// Shadow namespace for entries moved aside by quarantine repair
pub const QUARANTINE_PREFIX: &str = "scantosplit-quarantine:";

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Healthy,
    Warning,
    Critical,
    Full,
}

impl QuotaStatus {
    /// Bands are inclusive on their lower bound.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 100.0 {
            QuotaStatus::Full
        } else if percentage >= 95.0 {
            QuotaStatus::Critical
        } else if percentage >= 80.0 {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaStatus::Healthy => "healthy",
            QuotaStatus::Warning => "warning",
            QuotaStatus::Critical => "critical",
            QuotaStatus::Full => "full",
        }
    }
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QuotaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" => Ok(QuotaStatus::Healthy),
            "warning" => Ok(QuotaStatus::Warning),
            "critical" => Ok(QuotaStatus::Critical),
            "full" => Ok(QuotaStatus::Full),
            _ => Err(format!("Unknown quota status: {}", s)),
        }
    }
}

/// Storage usage, recomputed on every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub used: u64,
    pub available: u64,
    pub total: u64,
    /// 0-100, may exceed 100 when usage overshoots the quota
    pub percentage: f64,
    pub status: QuotaStatus,
}

impl StorageQuota {
    pub fn new(used: u64, total: u64) -> Self {
        let percentage = if total > 0 {
            used as f64 * 100.0 / total as f64
        } else if used > 0 {
            100.0
        } else {
            0.0
        };

        Self {
            used,
            available: total.saturating_sub(used),
            total,
            percentage,
            status: QuotaStatus::from_percentage(percentage),
        }
    }
}

/// Snapshot written by each health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    pub quota: StorageQuota,
    pub item_count: usize,
    pub corrupted_keys: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_check: DateTime<Utc>,
    pub version: String,
    #[serde(rename = "supportsIndexedDB")]
    pub supports_indexed_db: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVersionRecord {
    pub version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Change detector only, see [`crate::corruption::checksum`]
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageEventType {
    QuotaWarning,
    QuotaCritical,
    CorruptionDetected,
    MigrationNeeded,
}

impl StorageEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEventType::QuotaWarning => "quota-warning",
            StorageEventType::QuotaCritical => "quota-critical",
            StorageEventType::CorruptionDetected => "corruption-detected",
            StorageEventType::MigrationNeeded => "migration-needed",
        }
    }
}

impl std::fmt::Display for StorageEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "type")]
    pub kind: StorageEventType,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StorageEvent {
    pub fn new(kind: StorageEventType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
