//! Bounded diagnostic event log

use scantosplit_storage::utf16_footprint;

use crate::types::{StorageEvent, EVENTS_KEY};
use crate::{Result, SharedStore};

/// Append-only log persisted under the events key. Holds at most
/// [`EventLog::CAPACITY`] entries; the oldest are dropped first.
pub struct EventLog {
    store: SharedStore,
}

impl EventLog {
    pub const CAPACITY: usize = 50;

    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Read the log. An absent log is empty; an unparseable one is an error.
    pub fn try_list(&self) -> Result<Vec<StorageEvent>> {
        match self.store.get(EVENTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn list(&self) -> Vec<StorageEvent> {
        self.try_list().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Event log unreadable, treating as empty");
            Vec::new()
        })
    }

    /// Append an event. An unreadable log is replaced rather than blocking the write.
    pub fn try_append(&self, event: StorageEvent) -> Result<()> {
        let mut events = self.list();
        events.push(event);

        if events.len() > Self::CAPACITY {
            let overflow = events.len() - Self::CAPACITY;
            events.drain(..overflow);
        }

        self.write(&events)
    }

    pub fn append(&self, event: StorageEvent) {
        let kind = event.kind;
        if let Err(e) = self.try_append(event) {
            tracing::warn!(kind = %kind, error = %e, "Failed to append storage event");
        }
    }

    /// Keep only the newest `keep` events. Returns the bytes released.
    pub fn retain_last(&self, keep: usize) -> Result<u64> {
        let before = match self.store.get(EVENTS_KEY)? {
            Some(raw) => raw,
            None => return Ok(0),
        };

        let mut events = self.list();
        if events.len() > keep {
            let overflow = events.len() - keep;
            events.drain(..overflow);
        }

        let after = serde_json::to_string(&events)?;
        self.store.set(EVENTS_KEY, &after)?;

        let freed = utf16_footprint(EVENTS_KEY, &before)
            .saturating_sub(utf16_footprint(EVENTS_KEY, &after));
        tracing::debug!(kept = events.len(), freed, "Trimmed event log");

        Ok(freed)
    }

    fn write(&self, events: &[StorageEvent]) -> Result<()> {
        let raw = serde_json::to_string(events)?;
        self.store.set(EVENTS_KEY, &raw)?;
        Ok(())
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
