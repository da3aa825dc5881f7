//! Store manager handing out handles to named stores.

use std::sync::Arc;

use super::traits::{CacheStorage, StoreName};
use crate::error::StoreError;
use crate::http::{RequestDescriptor, ResponseSnapshot};

/// Owns the storage backend and hands out per-store handles.
///
/// This is the only shared mutable resource in the layer; clones share the
/// same backend.
#[derive(Clone)]
pub struct CacheStores {
  storage: Arc<dyn CacheStorage>,
}

impl CacheStores {
  pub fn new<S: CacheStorage + 'static>(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open a store, creating it if needed.
  pub async fn open(&self, name: &StoreName) -> Result<StoreHandle, StoreError> {
    if self.storage.open(name).await? {
      tracing::debug!(store = %name, "Created cache store");
    }
    Ok(self.handle(name))
  }

  /// A handle that does not create the store up front. The first write does,
  /// unless the store has been deleted.
  pub fn handle(&self, name: &StoreName) -> StoreHandle {
    StoreHandle {
      storage: Arc::clone(&self.storage),
      name: name.clone(),
    }
  }

  pub async fn delete(&self, name: &StoreName) -> Result<bool, StoreError> {
    self.storage.delete(name).await
  }

  pub async fn list(&self) -> Result<Vec<StoreName>, StoreError> {
    self.storage.list().await
  }

  pub async fn exists(&self, name: &StoreName) -> Result<bool, StoreError> {
    Ok(self.storage.entry_count(name).await?.is_some())
  }
}

/// A handle to one named store.
#[derive(Clone)]
pub struct StoreHandle {
  storage: Arc<dyn CacheStorage>,
  name: StoreName,
}

impl StoreHandle {
  pub fn name(&self) -> &StoreName {
    &self.name
  }

  pub async fn read(&self, request: &RequestDescriptor) -> Result<Option<ResponseSnapshot>, StoreError> {
    self.read_key(&request.cache_key()).await
  }

  pub async fn read_key(&self, key: &str) -> Result<Option<ResponseSnapshot>, StoreError> {
    self.storage.read(&self.name, key).await
  }

  /// Persist a snapshot under the request's key.
  ///
  /// Refuses anything that is not a complete, successful response.
  pub async fn write(
    &self,
    request: &RequestDescriptor,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError> {
    ensure_cacheable(snapshot)?;
    self
      .storage
      .write(&self.name, &request.cache_key(), snapshot)
      .await
  }

  /// Persist a batch atomically: either every entry lands or none does.
  pub async fn write_all(&self, entries: &[(String, ResponseSnapshot)]) -> Result<(), StoreError> {
    for (_, snapshot) in entries {
      ensure_cacheable(snapshot)?;
    }
    self.storage.write_all(&self.name, entries).await
  }

  pub async fn entry_count(&self) -> Result<usize, StoreError> {
    Ok(self.storage.entry_count(&self.name).await?.unwrap_or(0))
  }
}

fn ensure_cacheable(snapshot: &ResponseSnapshot) -> Result<(), StoreError> {
  if snapshot.is_cacheable() {
    Ok(())
  } else {
    Err(StoreError::Uncacheable {
      status: snapshot.status,
    })
  }
}
