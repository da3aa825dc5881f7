//! Request classification and the three caching strategies.
//!
//! Every read request is classified, then handed to exactly one executor:
//!
//! | Class            | Strategy               | Store   |
//! |------------------|------------------------|---------|
//! | `StaticAsset`    | `CacheFirst`           | static  |
//! | `ApiData`        | `NetworkFirst`         | dynamic |
//! | `NavigablePage`  | `StaleWhileRevalidate` | dynamic |
//!
//! Cache writes are a side effect. A failed write is logged and never keeps
//! a response from reaching the caller.

mod cache_first;
mod classify;
mod network_first;
mod stale_while_revalidate;

use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{CacheResult, CacheStores, StoreHandle};
use crate::config::LayerConfig;
use crate::error::{LayerError, LayerResult, StoreError};
use crate::http::{Network, RequestDescriptor, ResponseSnapshot};

pub use classify::{classify, PolicyClass};

/// A fixed ordering of cache and network consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl From<PolicyClass> for Strategy {
  fn from(class: PolicyClass) -> Self {
    match class {
      PolicyClass::StaticAsset => Self::CacheFirst,
      PolicyClass::ApiData => Self::NetworkFirst,
      PolicyClass::NavigablePage => Self::StaleWhileRevalidate,
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::CacheFirst => "cache-first",
      Self::NetworkFirst => "network-first",
      Self::StaleWhileRevalidate => "stale-while-revalidate",
    };
    f.write_str(name)
  }
}

/// A detached background refresh spawned by `StaleWhileRevalidate`.
///
/// The executor never awaits it. Dropping the handle leaves the task running.
#[derive(Debug)]
pub struct Revalidation(JoinHandle<()>);

impl Revalidation {
  /// Wait for the refresh to settle. Its outcome is never reported.
  pub async fn finished(self) {
    if let Err(e) = self.0.await {
      if e.is_panic() {
        tracing::warn!(error = %e, "Background revalidation panicked");
      }
    }
  }
}

/// What a strategy produced for one request.
#[derive(Debug)]
pub struct Handled {
  pub result: CacheResult,
  pub revalidation: Option<Revalidation>,
}

impl Handled {
  fn now(result: CacheResult) -> Self {
    Self {
      result,
      revalidation: None,
    }
  }

  pub fn response(&self) -> &ResponseSnapshot {
    &self.result.response
  }
}

/// Everything an executor may touch.
#[derive(Clone)]
pub(crate) struct StrategyContext {
  network: Arc<dyn Network>,
  static_store: StoreHandle,
  dynamic_store: StoreHandle,
}

/// Routes classified requests to their executor.
#[derive(Clone)]
pub struct Dispatcher {
  config: Arc<LayerConfig>,
  ctx: StrategyContext,
}

impl Dispatcher {
  /// Executors only ever see this version's static and dynamic stores.
  pub fn new(config: Arc<LayerConfig>, stores: &CacheStores, network: Arc<dyn Network>) -> Self {
    let ctx = StrategyContext {
      network,
      static_store: stores.handle(&config.static_store()),
      dynamic_store: stores.handle(&config.dynamic_store()),
    };
    Self { config, ctx }
  }

  pub fn strategy_for(&self, request: &RequestDescriptor) -> Strategy {
    classify(request, &self.config.routes).into()
  }

  /// Run the request through its strategy.
  ///
  /// Fails with `UnsupportedMethod` for anything but a read, without
  /// touching any store.
  pub async fn dispatch(&self, request: &RequestDescriptor) -> LayerResult<Handled> {
    if !request.is_read() {
      return Err(LayerError::UnsupportedMethod(request.method().clone()));
    }

    let strategy = self.strategy_for(request);
    tracing::debug!(url = %request.url(), %strategy, "Dispatching request");

    let handled = match strategy {
      Strategy::CacheFirst => cache_first::execute(&self.ctx, request).await.map(Handled::now)?,
      Strategy::NetworkFirst => network_first::execute(&self.ctx, request).await.map(Handled::now)?,
      Strategy::StaleWhileRevalidate => stale_while_revalidate::execute(&self.ctx, request).await?,
    };

    tracing::debug!(
      url = %request.url(),
      %strategy,
      source = ?handled.result.source,
      status = handled.result.response.status,
      "Request handled"
    );
    Ok(handled)
  }
}

/// Best-effort cache write: skips uncacheable responses, logs failures.
async fn persist(store: &StoreHandle, request: &RequestDescriptor, response: &ResponseSnapshot) {
  if !response.is_cacheable() {
    tracing::debug!(url = %request.url(), status = response.status, "Not caching response");
    return;
  }

  match store.write(request, response).await {
    Ok(()) => {}
    // A newer version swept this store; the write belongs to nobody now
    Err(StoreError::Deleted { .. }) => {
      tracing::debug!(store = %store.name(), url = %request.url(), "Store deleted; dropping write");
    }
    Err(e) => tracing::warn!(
      store = %store.name(),
      url = %request.url(),
      error = %e,
      "Cache write failed; serving response anyway"
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::testing::{layer_config, request, MockNetwork};
  use reqwest::Method;

  #[test]
  fn test_fixed_policy_mapping() {
    assert_eq!(Strategy::from(PolicyClass::StaticAsset), Strategy::CacheFirst);
    assert_eq!(Strategy::from(PolicyClass::ApiData), Strategy::NetworkFirst);
    assert_eq!(
      Strategy::from(PolicyClass::NavigablePage),
      Strategy::StaleWhileRevalidate
    );
  }

  #[tokio::test]
  async fn test_non_read_request_is_rejected_without_caching() {
    let network = Arc::new(MockNetwork::new());
    network.respond("/api/cells", 200, "[]");
    let stores = CacheStores::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(layer_config(), &stores, network.clone());

    let post = RequestDescriptor::new(
      Method::POST,
      request("/api/cells").url().clone(),
      Default::default(),
    );
    let err = dispatcher.dispatch(&post).await.unwrap_err();

    assert!(matches!(err, LayerError::UnsupportedMethod(Method::POST)));
    assert_eq!(network.calls(), 0);
    assert!(stores.list().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_partial_content_never_lands_in_any_store() {
    let network = Arc::new(MockNetwork::new());
    network.respond("/static/movie.mp4", 206, "part");
    network.respond("/api/range", 206, "part");
    network.respond("/clip", 206, "part");
    let stores = CacheStores::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(layer_config(), &stores, network.clone());

    for path in ["/static/movie.mp4", "/api/range", "/clip"] {
      let handled = dispatcher.dispatch(&request(path)).await.unwrap();
      assert_eq!(handled.response().status, 206);
      if let Some(revalidation) = handled.revalidation {
        revalidation.finished().await;
      }
    }

    for name in stores.list().await.unwrap() {
      assert_eq!(stores.handle(&name).entry_count().await.unwrap(), 0);
    }
  }

  #[tokio::test]
  async fn test_write_failure_still_delivers_response() {
    let network = Arc::new(MockNetwork::new());
    network.respond("/api/cells", 200, "a large response body");
    let stores = CacheStores::new(MemoryStorage::with_quota(4));
    let dispatcher = Dispatcher::new(layer_config(), &stores, network.clone());

    let handled = dispatcher.dispatch(&request("/api/cells")).await.unwrap();

    assert_eq!(handled.response().body, b"a large response body");
    assert_eq!(handled.result.source, crate::cache::CacheSource::Network);
    let dynamic = stores.handle(&layer_config().dynamic_store());
    assert_eq!(dynamic.entry_count().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_panicking_refresh_is_contained() {
    let revalidation = Revalidation(tokio::spawn(async { panic!("refresh exploded") }));
    revalidation.finished().await;
  }
}
