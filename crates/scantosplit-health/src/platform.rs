//! Host platform capabilities

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;
use crate::Result;

/// Usage and quota in bytes, as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

/// Optional capabilities of the environment hosting the store.
#[async_trait]
pub trait StoragePlatform: Send + Sync {
    /// Ask the host how much storage the origin uses. Failing here is
    /// expected on hosts without the capability.
    async fn estimate(&self) -> Result<StorageEstimate>;

    /// Feature detection only; nothing is ever written to IndexedDB.
    fn supports_indexed_db(&self) -> bool {
        false
    }
}

/// A platform with fixed answers
#[derive(Debug, Clone, Default)]
pub struct FixedPlatform {
    estimate: Option<StorageEstimate>,
    indexed_db: bool,
}

impl FixedPlatform {
    /// No estimate capability; quota falls back to the local estimate.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_estimate(usage: u64, quota: u64) -> Self {
        Self {
            estimate: Some(StorageEstimate { usage, quota }),
            indexed_db: false,
        }
    }

    pub fn indexed_db(mut self, supported: bool) -> Self {
        self.indexed_db = supported;
        self
    }
}

#[async_trait]
impl StoragePlatform for FixedPlatform {
    async fn estimate(&self) -> Result<StorageEstimate> {
        self.estimate.ok_or_else(|| {
            IntegrityError::QuotaUnavailable("platform has no storage estimate".to_string())
        })
    }

    fn supports_indexed_db(&self) -> bool {
        self.indexed_db
    }
}
