//! ScanToSplit Storage Layer
//!
//! String-keyed key/value persistence. Every higher layer talks to a
//! [`KeyValueStore`] rather than to a concrete backend, so the integrity
//! layer can run against SQLite on disk or an in-memory map in tests.

mod database;
mod error;
mod memory;
mod migrations;
mod store;

pub use database::Database;
pub use error::StorageError;
pub use memory::MemoryStore;
pub use store::{utf16_footprint, KeyValueStore};

pub type Result<T> = std::result::Result<T, StorageError>;
