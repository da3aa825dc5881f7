//! Network first: always prefer live data, keep a copy for when the network is gone.

use super::{persist, StrategyContext};
use crate::cache::CacheResult;
use crate::error::LayerResult;
use crate::fallback;
use crate::http::RequestDescriptor;

pub(super) async fn execute(ctx: &StrategyContext, request: &RequestDescriptor) -> LayerResult<CacheResult> {
  let error = match ctx.network.fetch(request).await {
    Ok(response) => {
      persist(&ctx.dynamic_store, request, &response).await;
      return Ok(CacheResult::from_network(response));
    }
    Err(e) => e,
  };

  tracing::debug!(url = %request.url(), error = %error, "Network failed; trying dynamic store");

  match ctx.dynamic_store.read(request).await {
    Ok(Some(cached)) => return Ok(CacheResult::from_cache(cached)),
    Ok(None) => {}
    Err(e) => {
      tracing::warn!(url = %request.url(), error = %e, "Dynamic store read failed");
    }
  }

  Ok(CacheResult::fallback(fallback::resolve(request.destination())))
}
