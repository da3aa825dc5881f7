//! Cache first: serve a stored copy with no network round trip, fetch only on a miss.

use super::{persist, StrategyContext};
use crate::cache::CacheResult;
use crate::error::LayerResult;
use crate::fallback;
use crate::http::{Destination, RequestDescriptor};

pub(super) async fn execute(ctx: &StrategyContext, request: &RequestDescriptor) -> LayerResult<CacheResult> {
  match ctx.static_store.read(request).await {
    Ok(Some(cached)) => return Ok(CacheResult::from_cache(cached)),
    Ok(None) => {}
    Err(e) => {
      tracing::warn!(url = %request.url(), error = %e, "Static store read failed; treating as miss");
    }
  }

  match ctx.network.fetch(request).await {
    Ok(response) => {
      persist(&ctx.static_store, request, &response).await;
      Ok(CacheResult::from_network(response))
    }
    Err(e) if request.destination() == Destination::Image => {
      tracing::debug!(url = %request.url(), error = %e, "Serving placeholder image");
      Ok(CacheResult::fallback(fallback::resolve(request.destination())))
    }
    Err(e) => Err(e.into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, CacheStores, MemoryStorage};
  use crate::error::LayerError;
  use crate::strategy::Dispatcher;
  use crate::testing::{layer_config, request, MockNetwork};
  use std::sync::Arc;

  fn setup() -> (Arc<MockNetwork>, CacheStores, Dispatcher) {
    let network = Arc::new(MockNetwork::new());
    let stores = CacheStores::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(layer_config(), &stores, network.clone());
    (network, stores, dispatcher)
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores_then_hit_skips_network() {
    let (network, stores, dispatcher) = setup();
    network.respond("/static/logo.png", 200, "png-bytes");

    let first = dispatcher.dispatch(&request("/static/logo.png")).await.unwrap();
    assert_eq!(first.result.source, CacheSource::Network);
    assert_eq!(first.response().body, b"png-bytes");
    assert_eq!(network.calls(), 1);

    let static_store = stores.handle(&layer_config().static_store());
    let stored = static_store.read(&request("/static/logo.png")).await.unwrap().unwrap();
    assert_eq!(stored.body, b"png-bytes");

    network.go_offline();
    let second = dispatcher.dispatch(&request("/static/logo.png")).await.unwrap();
    assert_eq!(second.result.source, CacheSource::Cache);
    assert_eq!(second.response().body, b"png-bytes");
    assert_eq!(network.calls(), 1);
  }

  #[tokio::test]
  async fn test_offline_image_miss_gets_placeholder() {
    let (network, stores, dispatcher) = setup();
    network.go_offline();

    let image = request("/images/cell.png").with_destination(Destination::Image);
    let handled = dispatcher.dispatch(&image).await.unwrap();

    assert_eq!(handled.result.source, CacheSource::Fallback);
    assert_eq!(handled.response().content_type(), Some("image/gif"));
    // Fallbacks are never persisted
    assert!(stores.list().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_non_image_miss_propagates() {
    let (network, _stores, dispatcher) = setup();
    network.go_offline();

    let err = dispatcher.dispatch(&request("/static/app.js")).await.unwrap_err();
    assert!(matches!(err, LayerError::Network(_)));
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_stored() {
    let (network, stores, dispatcher) = setup();
    network.respond("/static/missing.css", 404, "not found");

    let handled = dispatcher.dispatch(&request("/static/missing.css")).await.unwrap();
    assert_eq!(handled.response().status, 404);

    let static_store = stores.handle(&layer_config().static_store());
    assert_eq!(static_store.read(&request("/static/missing.css")).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_does_not_read_dynamic_store() {
    let (network, stores, dispatcher) = setup();
    network.respond("/static/app.js", 200, "fresh");
    let dynamic = stores.handle(&layer_config().dynamic_store());
    dynamic
      .write(
        &request("/static/app.js"),
        &crate::http::ResponseSnapshot::new(200, vec![], "wrong-store"),
      )
      .await
      .unwrap();

    let handled = dispatcher.dispatch(&request("/static/app.js")).await.unwrap();
    assert_eq!(handled.response().body, b"fresh");
  }
}
