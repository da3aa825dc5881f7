//! Install and activation of a layer version.
//!
//! ```text
//! Uninstalled -> Installing -> Installed (waiting) -> Activating -> Active
//!      ^             |                                   |
//!      +-- failure --+          Installed <-- failure ---+
//! ```
//!
//! Install pre-populates the static store with the critical-resource
//! manifest, all or nothing. Activation deletes every store that does not
//! belong to this version, then claims clients.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::{CacheStores, StoreName};
use crate::config::{LayerConfig, VersionTags};
use crate::error::{LayerError, LayerResult, NetworkError};
use crate::http::{Network, RequestDescriptor, ResponseSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and waiting for the activation signal
  Installed,
  Activating,
  Active,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Uninstalled => "uninstalled",
      Self::Installing => "installing",
      Self::Installed => "installed (waiting)",
      Self::Activating => "activating",
      Self::Active => "active",
    };
    f.write_str(name)
  }
}

/// Which layer version controls connected clients.
///
/// One `Clients` is shared by every version running on a host. Claiming it
/// moves all clients to the claiming version.
#[derive(Clone)]
pub struct Clients {
  controller: Arc<watch::Sender<Option<VersionTags>>>,
}

impl Default for Clients {
  fn default() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self {
      controller: Arc::new(tx),
    }
  }
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn claim(&self, versions: &VersionTags) {
    self.controller.send_replace(Some(versions.clone()));
  }

  pub fn controller(&self) -> Option<VersionTags> {
    self.controller.borrow().clone()
  }

  /// Notified whenever a new version claims the clients.
  pub fn subscribe(&self) -> watch::Receiver<Option<VersionTags>> {
    self.controller.subscribe()
  }
}

/// Drives one version of the layer through its lifecycle.
pub struct LifecycleController {
  config: Arc<LayerConfig>,
  stores: CacheStores,
  network: Arc<dyn Network>,
  clients: Clients,
  state: watch::Sender<LifecycleState>,
}

impl LifecycleController {
  pub fn new(
    config: Arc<LayerConfig>,
    stores: CacheStores,
    network: Arc<dyn Network>,
    clients: Clients,
  ) -> Self {
    let (state, _rx) = watch::channel(LifecycleState::Uninstalled);
    Self {
      config,
      stores,
      network,
      clients,
      state,
    }
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.borrow()
  }

  /// True once active and still the version clients are bound to.
  pub fn controls_clients(&self) -> bool {
    self.state() == LifecycleState::Active
      && self.clients.controller().as_ref() == Some(&self.config.versions)
  }

  /// Populate the static store with the whole manifest.
  ///
  /// Fails with `InstallManifestIncomplete` if any resource cannot be
  /// fetched; the store is then left without any of the manifest and the
  /// next attempt starts over.
  pub async fn install(&self) -> LayerResult<()> {
    self.begin("install", &[LifecycleState::Uninstalled], LifecycleState::Installing)?;

    match self.populate_static_store().await {
      Ok(count) => {
        self.set(LifecycleState::Installed);
        tracing::info!(
          store = %self.config.static_store(),
          resources = count,
          "Installed; waiting for activation"
        );
        Ok(())
      }
      Err(e) => {
        self.set(LifecycleState::Uninstalled);
        tracing::warn!(error = %e, "Install failed");
        Err(e)
      }
    }
  }

  /// Delete every store that is not this version's, then claim clients.
  ///
  /// Deleted stores stay deleted, so work still in flight for an older
  /// version cannot bring them back. Returns the number of stores deleted.
  pub async fn activate(&self) -> LayerResult<usize> {
    self.begin("activate", &[LifecycleState::Installed], LifecycleState::Activating)?;

    let outcome = async {
      let removed = self.sweep().await?;
      // Reclaims the name if an earlier sweep deleted it
      self.stores.open(&self.config.dynamic_store()).await?;
      Ok::<_, LayerError>(removed)
    }
    .await;

    match outcome {
      Ok(removed) => {
        self.set(LifecycleState::Active);
        self.clients.claim(&self.config.versions);
        tracing::info!(
          static_version = %self.config.versions.static_tag,
          dynamic_version = %self.config.versions.dynamic,
          removed,
          "Activated and claimed clients"
        );
        Ok(removed)
      }
      Err(e) => {
        self.set(LifecycleState::Installed);
        tracing::warn!(error = %e, "Activation sweep failed");
        Err(e)
      }
    }
  }

  /// Resume a version installed by an earlier process.
  ///
  /// If the static store already holds every manifest resource the version
  /// is activated without refetching. Returns false if a fresh install is
  /// needed.
  pub async fn restore(&self) -> LayerResult<bool> {
    if self.state() != LifecycleState::Uninstalled {
      return Ok(false);
    }

    let handle = self.stores.handle(&self.config.static_store());
    for request in self.manifest_requests()? {
      if handle.read(&request).await?.is_none() {
        tracing::debug!(url = %request.url(), "Manifest resource missing; install required");
        return Ok(false);
      }
    }

    self.begin("restore", &[LifecycleState::Uninstalled], LifecycleState::Installed)?;
    self.activate().await?;
    Ok(true)
  }

  async fn populate_static_store(&self) -> LayerResult<usize> {
    let name = self.config.static_store();
    let existed = self.stores.exists(&name).await?;
    let handle = self.stores.open(&name).await?;

    let outcome = async {
      let entries = self.fetch_manifest().await?;
      handle.write_all(&entries).await?;
      Ok::<_, LayerError>(entries.len())
    }
    .await;

    if outcome.is_err() && !existed {
      self.discard(&name).await;
    }
    outcome
  }

  async fn fetch_manifest(&self) -> LayerResult<Vec<(String, ResponseSnapshot)>> {
    let requests = self.manifest_requests()?;
    let total = requests.len();

    let results = futures::future::join_all(requests.iter().map(|r| self.network.fetch(r))).await;

    let mut entries = Vec::with_capacity(total);
    let mut failed = Vec::new();
    for (request, result) in requests.iter().zip(results) {
      let reason = match result {
        Ok(response) if response.is_cacheable() => {
          entries.push((request.cache_key(), response));
          continue;
        }
        Ok(response) => format!("status {}", response.status),
        Err(e) => e.reason,
      };
      tracing::warn!(url = %request.url(), %reason, "Manifest resource could not be cached");
      failed.push(request.url().to_string());
    }

    match failed.first() {
      None => Ok(entries),
      Some(first_failure) => Err(LayerError::InstallManifestIncomplete {
        failed: failed.len(),
        total,
        first_failure: first_failure.clone(),
      }),
    }
  }

  fn manifest_requests(&self) -> LayerResult<Vec<RequestDescriptor>> {
    self
      .config
      .manifest
      .iter()
      .map(|path| {
        self
          .config
          .resolve(path)
          .map(RequestDescriptor::get)
          .map_err(|e| LayerError::from(NetworkError::new(path.as_str(), e.to_string())))
      })
      .collect()
  }

  async fn sweep(&self) -> LayerResult<usize> {
    let keep = [self.config.static_store(), self.config.dynamic_store()];
    let mut removed = 0;

    for name in self.stores.list().await? {
      if keep.contains(&name) {
        continue;
      }
      tracing::info!(store = %name, "Deleting outdated cache store");
      if self.stores.delete(&name).await? {
        removed += 1;
      }
    }

    Ok(removed)
  }

  async fn discard(&self, name: &StoreName) {
    if let Err(e) = self.stores.delete(name).await {
      tracing::warn!(store = %name, error = %e, "Failed to discard partially installed store");
    }
  }

  fn begin(
    &self,
    action: &'static str,
    from: &[LifecycleState],
    to: LifecycleState,
  ) -> LayerResult<()> {
    let mut rejected = None;
    self.state.send_if_modified(|state| {
      if from.contains(state) {
        *state = to;
        true
      } else {
        rejected = Some(*state);
        false
      }
    });

    match rejected {
      Some(state) => Err(LayerError::InvalidTransition { action, state }),
      None => {
        tracing::debug!(%action, state = %to, "Lifecycle transition");
        Ok(())
      }
    }
  }

  fn set(&self, state: LifecycleState) {
    self.state.send_replace(state);
  }
}
