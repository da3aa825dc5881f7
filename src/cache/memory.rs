//! In-process cache storage.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use super::traits::{CacheStorage, StoreName};
use crate::error::StoreError;
use crate::http::ResponseSnapshot;

type Entries = HashMap<String, ResponseSnapshot>;

#[derive(Default)]
struct State {
  stores: BTreeMap<StoreName, Entries>,
  /// Deleted names; writes may not recreate these until reopened
  deleted: HashSet<StoreName>,
}

impl State {
  fn usage(&self) -> usize {
    self
      .stores
      .values()
      .flat_map(|entries| entries.values())
      .map(ResponseSnapshot::size)
      .sum()
  }
}

/// Storage that keeps every store in memory.
///
/// Used for tests and hosts without a writable data directory. An optional
/// byte quota applies across all stores.
#[derive(Default)]
pub struct MemoryStorage {
  state: RwLock<State>,
  quota_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes that would push total usage past `quota_bytes`.
  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      state: RwLock::default(),
      quota_bytes: Some(quota_bytes),
    }
  }
}

fn poisoned(store: &StoreName) -> StoreError {
  StoreError::unavailable(store.to_string(), "Lock poisoned")
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open(&self, store: &StoreName) -> Result<bool, StoreError> {
    let mut state = self.state.write().map_err(|_| poisoned(store))?;
    state.deleted.remove(store);
    if state.stores.contains_key(store) {
      return Ok(false);
    }
    state.stores.insert(store.clone(), Entries::new());
    Ok(true)
  }

  async fn read(&self, store: &StoreName, key: &str) -> Result<Option<ResponseSnapshot>, StoreError> {
    let state = self.state.read().map_err(|_| poisoned(store))?;
    Ok(state.stores.get(store).and_then(|entries| entries.get(key)).cloned())
  }

  async fn write(
    &self,
    store: &StoreName,
    key: &str,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError> {
    self
      .write_all(store, &[(key.to_string(), snapshot.clone())])
      .await
  }

  async fn write_all(
    &self,
    store: &StoreName,
    entries: &[(String, ResponseSnapshot)],
  ) -> Result<(), StoreError> {
    let mut state = self.state.write().map_err(|_| poisoned(store))?;

    if state.deleted.contains(store) {
      return Err(StoreError::Deleted {
        store: store.to_string(),
      });
    }

    if let Some(quota) = self.quota_bytes {
      let replaced: usize = state
        .stores
        .get(store)
        .map(|existing| {
          entries
            .iter()
            .filter_map(|(key, _)| existing.get(key))
            .map(ResponseSnapshot::size)
            .sum()
        })
        .unwrap_or(0);
      let added: usize = entries.iter().map(|(_, s)| s.size()).sum();

      if state.usage() - replaced + added > quota {
        return Err(StoreError::QuotaExceeded {
          store: store.to_string(),
        });
      }
    }

    let target = state.stores.entry(store.clone()).or_default();
    for (key, snapshot) in entries {
      target.insert(key.clone(), snapshot.clone());
    }
    Ok(())
  }

  async fn entry_count(&self, store: &StoreName) -> Result<Option<usize>, StoreError> {
    let state = self.state.read().map_err(|_| poisoned(store))?;
    Ok(state.stores.get(store).map(HashMap::len))
  }

  async fn delete(&self, store: &StoreName) -> Result<bool, StoreError> {
    let mut state = self.state.write().map_err(|_| poisoned(store))?;
    state.deleted.insert(store.clone());
    Ok(state.stores.remove(store).is_some())
  }

  async fn list(&self) -> Result<Vec<StoreName>, StoreError> {
    let state = self
      .state
      .read()
      .map_err(|_| StoreError::unavailable("*", "Lock poisoned"))?;
    Ok(state.stores.keys().cloned().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_quota_rejects_whole_batch() {
    let storage = MemoryStorage::with_quota(10);
    let store = StoreName::static_store("v1");

    let batch = vec![
      ("a".to_string(), ResponseSnapshot::new(200, vec![], "12345")),
      ("b".to_string(), ResponseSnapshot::new(200, vec![], "123456")),
    ];
    let err = storage.write_all(&store, &batch).await.unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    assert_eq!(storage.entry_count(&store).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_overwrite_counts_against_quota_once() {
    let storage = MemoryStorage::with_quota(10);
    let store = StoreName::dynamic_store("v1");

    storage
      .write(&store, "k", &ResponseSnapshot::new(200, vec![], "12345678"))
      .await
      .unwrap();
    storage
      .write(&store, "k", &ResponseSnapshot::new(200, vec![], "abcdefgh"))
      .await
      .unwrap();

    let read = storage.read(&store, "k").await.unwrap().unwrap();
    assert_eq!(read.body, b"abcdefgh");
  }

  #[tokio::test]
  async fn test_concurrent_writes_keep_every_key() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    let store = StoreName::dynamic_store("v1");

    let tasks: Vec<_> = (0..16)
      .map(|i| {
        let storage = std::sync::Arc::clone(&storage);
        let store = store.clone();
        tokio::spawn(async move {
          let snapshot = ResponseSnapshot::new(200, vec![], format!("body-{}", i));
          storage.write(&store, &format!("key-{}", i), &snapshot).await
        })
      })
      .collect();

    for task in futures::future::join_all(tasks).await {
      task.unwrap().unwrap();
    }

    assert_eq!(storage.entry_count(&store).await.unwrap(), Some(16));
    let read = storage.read(&store, "key-7").await.unwrap().unwrap();
    assert_eq!(read.body, b"body-7");
  }

  #[tokio::test]
  async fn test_deleted_store_is_not_recreated_by_writes() {
    let storage = MemoryStorage::new();
    let store = StoreName::dynamic_store("v1");
    let snapshot = ResponseSnapshot::new(200, vec![], "page");

    storage.write(&store, "k", &snapshot).await.unwrap();
    assert!(storage.delete(&store).await.unwrap());

    let err = storage.write(&store, "k", &snapshot).await.unwrap_err();
    assert!(matches!(err, StoreError::Deleted { .. }));
    assert!(storage.list().await.unwrap().is_empty());

    assert!(storage.open(&store).await.unwrap());
    storage.write(&store, "k", &snapshot).await.unwrap();
    assert_eq!(storage.entry_count(&store).await.unwrap(), Some(1));
  }
}
