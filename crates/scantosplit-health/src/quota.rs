//! Storage quota monitoring

use std::sync::Arc;
use std::time::Duration;

use scantosplit_storage::utf16_footprint;

use crate::error::IntegrityError;
use crate::events::EventLog;
use crate::platform::StoragePlatform;
use crate::types::{StorageEvent, StorageEventType, StorageQuota};
use crate::{Result, SharedStore};

/// Total assumed when the platform cannot report a quota (5 MiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

pub const DEFAULT_ESTIMATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events kept by [`QuotaMonitor::clear_old_data`]
const RETAINED_EVENTS: usize = 10;

pub struct QuotaMonitor {
    store: SharedStore,
    events: EventLog,
    platform: Option<Arc<dyn StoragePlatform>>,
    fallback_total: u64,
    estimate_timeout: Duration,
}

impl QuotaMonitor {
    pub fn new(store: SharedStore, events: EventLog) -> Self {
        Self {
            store,
            events,
            platform: None,
            fallback_total: DEFAULT_QUOTA_BYTES,
            estimate_timeout: DEFAULT_ESTIMATE_TIMEOUT,
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn StoragePlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_fallback_total(mut self, total: u64) -> Self {
        self.fallback_total = total;
        self
    }

    pub fn with_estimate_timeout(mut self, timeout: Duration) -> Self {
        self.estimate_timeout = timeout;
        self
    }

    /// Current usage. Prefers the platform estimate and falls back to the
    /// local estimate when it is missing, fails, or does not answer in time.
    pub async fn get_quota(&self) -> StorageQuota {
        match self.platform_quota().await {
            Ok(quota) => quota,
            Err(e) => {
                tracing::warn!(error = %e, "Platform quota unavailable, using local estimate");
                self.estimate_local()
            }
        }
    }

    async fn platform_quota(&self) -> Result<StorageQuota> {
        let platform = self.platform.as_ref().ok_or_else(|| {
            IntegrityError::QuotaUnavailable("no platform estimate capability".to_string())
        })?;

        let estimate = tokio::time::timeout(self.estimate_timeout, platform.estimate())
            .await
            .map_err(|_| {
                IntegrityError::QuotaUnavailable(format!(
                    "estimate timed out after {}ms",
                    self.estimate_timeout.as_millis()
                ))
            })??;

        if estimate.quota == 0 {
            return Err(IntegrityError::QuotaUnavailable(
                "platform reported a zero quota".to_string(),
            ));
        }

        Ok(StorageQuota::new(estimate.usage, estimate.quota))
    }

    /// Sum of the UTF-16 footprint of every entry against the fallback total.
    pub fn estimate_local(&self) -> StorageQuota {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot enumerate store for quota estimate");
                Vec::new()
            }
        };

        let used = keys
            .iter()
            .filter_map(|key| match self.store.get(key) {
                Ok(Some(value)) => Some(utf16_footprint(key, &value)),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .sum();

        StorageQuota::new(used, self.fallback_total)
    }

    /// Trim the event log to its newest entries and record that it happened.
    ///
    /// Only the log is touched, so this barely dents pressure caused by
    /// domain data. Returns the bytes released.
    pub fn try_clear_old_data(&self) -> Result<u64> {
        let freed = self.events.retain_last(RETAINED_EVENTS)?;

        self.events.try_append(
            StorageEvent::new(
                StorageEventType::QuotaWarning,
                format!("Cleared old data, freed {}", format_bytes(freed)),
            )
            .with_data(serde_json::json!({ "freedBytes": freed })),
        )?;

        tracing::info!(freed, "Cleared old storage data");

        Ok(freed)
    }

    pub fn clear_old_data(&self) -> u64 {
        self.try_clear_old_data().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to clear old data");
            0
        })
    }
}

/// Binary units, at most two decimals, trailing zeros dropped.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    const K: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut exponent = 0;
    while exponent < UNITS.len() - 1 && bytes >= K.pow(exponent as u32 + 1) {
        exponent += 1;
    }

    let value = bytes as f64 / K.pow(exponent as u32) as f64;
    let fixed = format!("{:.2}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');

    format!("{} {}", trimmed, UNITS[exponent])
}

/// Nearest whole percent, halves rounding up.
pub fn format_percentage(percentage: f64) -> String {
    format!("{}%", (percentage + 0.5).floor() as i64)
}
