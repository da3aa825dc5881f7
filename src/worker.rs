//! The layer as the hosting platform sees it.
//!
//! A host adapter calls `on_install`, then `on_activate`, then
//! `on_intercept` for every outgoing request. Several versions can run side
//! by side on one storage backend; only the version that last activated
//! answers intercepted requests.

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::cache::CacheStores;
use crate::config::LayerConfig;
use crate::error::LayerResult;
use crate::http::{Network, RequestDescriptor};
use crate::lifecycle::{Clients, LifecycleController, LifecycleState};
use crate::peripheral::{self, Notification, SyncOutcome, BACKGROUND_SYNC_TAG};
use crate::strategy::{Dispatcher, Handled};

/// Entry points exposed to the hosting platform.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
  async fn on_install(&self) -> LayerResult<()>;

  async fn on_activate(&self) -> LayerResult<()>;

  async fn on_intercept(&self, request: RequestDescriptor) -> LayerResult<Intercepted>;
}

/// Outcome of offering a request to the layer.
#[derive(Debug)]
pub enum Intercepted {
  /// The layer produced the response
  Handled(Handled),
  /// Not ours: the host should perform the request itself
  Bypassed,
}

impl Intercepted {
  pub fn handled(self) -> Option<Handled> {
    match self {
      Self::Handled(handled) => Some(handled),
      Self::Bypassed => None,
    }
  }
}

/// One version of the offline layer.
pub struct OfflineLayer {
  config: Arc<LayerConfig>,
  stores: CacheStores,
  lifecycle: LifecycleController,
  dispatcher: Dispatcher,
}

impl OfflineLayer {
  pub fn new(
    config: LayerConfig,
    stores: CacheStores,
    network: Arc<dyn Network>,
    clients: Clients,
  ) -> Self {
    let config = Arc::new(config);
    let lifecycle = LifecycleController::new(
      Arc::clone(&config),
      stores.clone(),
      Arc::clone(&network),
      clients,
    );
    let dispatcher = Dispatcher::new(Arc::clone(&config), &stores, network);

    Self {
      config,
      stores,
      lifecycle,
      dispatcher,
    }
  }

  pub fn config(&self) -> &LayerConfig {
    &self.config
  }

  pub fn lifecycle(&self) -> &LifecycleController {
    &self.lifecycle
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// Whether a snapshot for `url` is held by this version's stores.
  pub async fn is_available(&self, url: &Url) -> bool {
    let request = RequestDescriptor::get(url.clone());
    for name in [self.config.static_store(), self.config.dynamic_store()] {
      match self.stores.handle(&name).read(&request).await {
        Ok(Some(_)) => return true,
        Ok(None) => {}
        Err(e) => tracing::warn!(store = %name, error = %e, "Availability check failed"),
      }
    }
    false
  }

  /// Connectivity restored. There is no queued-action model, so replay is a
  /// logged no-op for the background-sync tag.
  pub async fn on_sync(&self, tag: &str) -> SyncOutcome {
    if tag == BACKGROUND_SYNC_TAG {
      tracing::info!(tag, "Performing background sync");
      SyncOutcome::Replayed
    } else {
      tracing::debug!(tag, "Ignoring sync tag");
      SyncOutcome::Ignored
    }
  }

  pub fn on_push(&self, payload: Option<&str>) -> Notification {
    peripheral::notification(&self.config.notification, payload)
  }

  /// URL to open for a clicked notification action.
  pub fn on_notification_click(&self, action: Option<&str>) -> Option<Url> {
    peripheral::click_target(action).and_then(|path| self.config.resolve(path).ok())
  }
}

#[async_trait]
impl LifecycleHooks for OfflineLayer {
  async fn on_install(&self) -> LayerResult<()> {
    self.lifecycle.install().await
  }

  async fn on_activate(&self) -> LayerResult<()> {
    self.lifecycle.activate().await.map(|_| ())
  }

  async fn on_intercept(&self, request: RequestDescriptor) -> LayerResult<Intercepted> {
    if !request.is_read() || !self.config.is_same_origin(request.url()) {
      tracing::trace!(method = %request.method(), url = %request.url(), "Bypassing layer");
      return Ok(Intercepted::Bypassed);
    }

    if !self.lifecycle.controls_clients() {
      tracing::trace!(url = %request.url(), state = %self.state(), "Not controlling clients");
      return Ok(Intercepted::Bypassed);
    }

    let handled = self.dispatcher.dispatch(&request).await?;
    Ok(Intercepted::Handled(handled))
  }
}
