//! Versioned cache stores for offline support.
//!
//! This module provides:
//! - Named stores split into a static and a dynamic role, each tagged with a version
//! - Response snapshots keyed by request URL
//! - SQLite persistence plus an in-memory backend
//! - A manager that hands out per-store handles and refuses uncacheable responses

mod manager;
mod memory;
mod storage;
mod traits;

pub use manager::{CacheStores, StoreHandle};
pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, StoreName, StoreRole};
