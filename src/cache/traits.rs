//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::StoreError;
use crate::http::ResponseSnapshot;

/// The two roles a store name can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreRole {
  /// Pre-populated at install, rarely written afterwards
  Static,
  /// Grows from live traffic
  Dynamic,
}

impl StoreRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "static" => Some(Self::Static),
      "dynamic" => Some(Self::Dynamic),
      _ => None,
    }
  }
}

impl fmt::Display for StoreRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A versioned store name, rendered as `{role}-{version}` (e.g. `static-v2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreName {
  pub role: StoreRole,
  pub version: String,
}

impl StoreName {
  pub fn new(role: StoreRole, version: impl Into<String>) -> Self {
    Self {
      role,
      version: version.into(),
    }
  }

  pub fn static_store(version: impl Into<String>) -> Self {
    Self::new(StoreRole::Static, version)
  }

  pub fn dynamic_store(version: impl Into<String>) -> Self {
    Self::new(StoreRole::Dynamic, version)
  }

  /// Parse a rendered name back into role and version.
  pub fn parse(name: &str) -> Option<Self> {
    let (role, version) = name.split_once('-')?;
    if version.is_empty() {
      return None;
    }
    Some(Self::new(StoreRole::parse(role)?, version))
  }
}

impl fmt::Display for StoreName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.role, self.version)
  }
}

/// Result of a strategy execution, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult {
  /// The response handed back to the caller
  pub response: ResponseSnapshot,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was captured (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  /// A live network response.
  pub fn from_network(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// A response replayed from a store.
  pub fn from_cache(response: ResponseSnapshot) -> Self {
    let cached_at = Some(response.captured_at);
    Self {
      response,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  /// A synthetic last-resort response.
  pub fn fallback(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: CacheSource::Fallback,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Replayed from a store, possibly stale
  Cache,
  /// Synthesized because both network and cache failed
  Fallback,
}

/// Trait for cache storage backends.
///
/// Every operation is independently fallible. Writes to the same key
/// must serialize; the last writer wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the store if it does not exist. Returns true if it was created.
  ///
  /// This is the only way to bring back a deleted store.
  async fn open(&self, store: &StoreName) -> Result<bool, StoreError>;

  /// Look up a snapshot. A missing store is a miss.
  async fn read(&self, store: &StoreName, key: &str) -> Result<Option<ResponseSnapshot>, StoreError>;

  /// Store a snapshot, creating the store lazily.
  ///
  /// A deleted store is not recreated: the write fails with
  /// `StoreError::Deleted` until the store is opened again.
  async fn write(
    &self,
    store: &StoreName,
    key: &str,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError>;

  /// Store several snapshots in one all-or-nothing batch.
  async fn write_all(
    &self,
    store: &StoreName,
    entries: &[(String, ResponseSnapshot)],
  ) -> Result<(), StoreError>;

  /// Number of entries in a store, `None` if it does not exist.
  async fn entry_count(&self, store: &StoreName) -> Result<Option<usize>, StoreError>;

  /// Drop a store and all its entries, and refuse lazy recreation of its
  /// name. Returns true if it existed.
  async fn delete(&self, store: &StoreName) -> Result<bool, StoreError>;

  /// All known stores.
  async fn list(&self) -> Result<Vec<StoreName>, StoreError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_name_round_trip() {
    let name = StoreName::static_store("v2");
    assert_eq!(name.to_string(), "static-v2");
    assert_eq!(StoreName::parse("static-v2"), Some(name));
    assert_eq!(
      StoreName::parse("dynamic-2024-01"),
      Some(StoreName::dynamic_store("2024-01"))
    );
  }

  #[test]
  fn test_store_name_rejects_foreign_names() {
    assert_eq!(StoreName::parse("anatomy-cells-v2"), None);
    assert_eq!(StoreName::parse("static-"), None);
    assert_eq!(StoreName::parse("static"), None);
  }
}
