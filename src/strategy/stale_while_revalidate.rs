//! Stale while revalidate: answer from the dynamic store immediately and
//! refresh it in the background for the next request.

use std::sync::Arc;

use super::{persist, Handled, Revalidation, StrategyContext};
use crate::cache::CacheResult;
use crate::error::LayerResult;
use crate::http::RequestDescriptor;

pub(super) async fn execute(ctx: &StrategyContext, request: &RequestDescriptor) -> LayerResult<Handled> {
  let cached = match ctx.dynamic_store.read(request).await {
    Ok(cached) => cached,
    Err(e) => {
      tracing::warn!(url = %request.url(), error = %e, "Dynamic store read failed; treating as miss");
      None
    }
  };

  if let Some(cached) = cached {
    let revalidation = spawn_refresh(ctx, request.clone());
    return Ok(Handled {
      result: CacheResult::from_cache(cached),
      revalidation: Some(revalidation),
    });
  }

  // Nothing cached: the caller has to wait for the network
  let error = match ctx.network.fetch(request).await {
    Ok(response) => {
      persist(&ctx.dynamic_store, request, &response).await;
      return Ok(Handled::now(CacheResult::from_network(response)));
    }
    Err(e) => e,
  };

  let variant = request.variant_key();
  if variant != request.cache_key() {
    if let Ok(Some(cached)) = ctx.dynamic_store.read_key(&variant).await {
      tracing::debug!(url = %request.url(), "Serving query-less variant from dynamic store");
      return Ok(Handled::now(CacheResult::from_cache(cached)));
    }
  }

  Err(error.into())
}

/// Fetch and store in a detached task. Failures are logged and dropped.
fn spawn_refresh(ctx: &StrategyContext, request: RequestDescriptor) -> Revalidation {
  let network = Arc::clone(&ctx.network);
  let store = ctx.dynamic_store.clone();

  Revalidation(tokio::spawn(async move {
    match network.fetch(&request).await {
      Ok(response) => persist(&store, &request, &response).await,
      Err(e) => {
        tracing::debug!(url = %request.url(), error = %e, "Background revalidation failed");
      }
    }
  }))
}

#[cfg(test)]
mod tests {
  use crate::cache::{CacheSource, CacheStores, MemoryStorage};
  use crate::error::LayerError;
  use crate::http::ResponseSnapshot;
  use crate::strategy::Dispatcher;
  use crate::testing::{layer_config, request, MockNetwork};
  use std::sync::Arc;

  fn setup() -> (Arc<MockNetwork>, CacheStores, Dispatcher) {
    let network = Arc::new(MockNetwork::new());
    let stores = CacheStores::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(layer_config(), &stores, network.clone());
    (network, stores, dispatcher)
  }

  async fn seed(stores: &CacheStores, path: &str, body: &str) {
    stores
      .handle(&layer_config().dynamic_store())
      .write(&request(path), &ResponseSnapshot::new(200, vec![], body))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_stale_entry_served_then_refreshed() {
    let (network, stores, dispatcher) = setup();
    seed(&stores, "/human-cell", "stale").await;
    network.respond("/human-cell", 200, "fresh");

    let first = dispatcher.dispatch(&request("/human-cell")).await.unwrap();
    assert_eq!(first.result.source, CacheSource::Cache);
    assert_eq!(first.response().body, b"stale");

    first.revalidation.expect("refresh spawned").finished().await;

    let dynamic = stores.handle(&layer_config().dynamic_store());
    let stored = dynamic.read(&request("/human-cell")).await.unwrap().unwrap();
    assert_eq!(stored.body, b"fresh");

    let second = dispatcher.dispatch(&request("/human-cell")).await.unwrap();
    assert_eq!(second.response().body, b"fresh");
  }

  #[tokio::test]
  async fn test_cached_answer_does_not_wait_for_network() {
    let (network, stores, dispatcher) = setup();
    seed(&stores, "/human-cell", "stale").await;
    network.hang("/human-cell");

    let handled = tokio::time::timeout(
      std::time::Duration::from_secs(5),
      dispatcher.dispatch(&request("/human-cell")),
    )
    .await
    .expect("cached response must not block on the network")
    .unwrap();

    assert_eq!(handled.response().body, b"stale");
    assert!(handled.revalidation.is_some());
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_cached_entry() {
    let (network, stores, dispatcher) = setup();
    seed(&stores, "/human-cell", "stale").await;
    network.go_offline();

    let handled = dispatcher.dispatch(&request("/human-cell")).await.unwrap();
    assert_eq!(handled.response().body, b"stale");
    handled.revalidation.unwrap().finished().await;

    let dynamic = stores.handle(&layer_config().dynamic_store());
    assert_eq!(dynamic.read(&request("/human-cell")).await.unwrap().unwrap().body, b"stale");
  }

  #[tokio::test]
  async fn test_miss_waits_for_network_and_stores() {
    let (network, stores, dispatcher) = setup();
    network.respond("/about", 200, "about page");

    let handled = dispatcher.dispatch(&request("/about")).await.unwrap();
    assert_eq!(handled.result.source, CacheSource::Network);
    assert!(handled.revalidation.is_none());

    let dynamic = stores.handle(&layer_config().dynamic_store());
    assert_eq!(dynamic.read(&request("/about")).await.unwrap().unwrap().body, b"about page");
  }

  #[tokio::test]
  async fn test_miss_offline_degrades_to_query_less_variant() {
    let (network, stores, dispatcher) = setup();
    seed(&stores, "/human-cell", "base page").await;
    network.go_offline();

    let handled = dispatcher.dispatch(&request("/human-cell?tab=organelles")).await.unwrap();
    assert_eq!(handled.result.source, CacheSource::Cache);
    assert_eq!(handled.response().body, b"base page");
  }

  #[tokio::test]
  async fn test_miss_offline_without_variant_fails() {
    let (network, _stores, dispatcher) = setup();
    network.go_offline();

    let err = dispatcher.dispatch(&request("/human-cell")).await.unwrap_err();
    assert!(matches!(err, LayerError::Network(_)));
  }
}
