//! Error types for the interception layer.
//!
//! Library operations return `LayerResult<T>`. Storage and network failures
//! have their own types so executors can decide which ones to swallow.

use reqwest::Method;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Result type alias for layer operations
pub type LayerResult<T> = Result<T, LayerError>;

/// Failures surfaced by the layer to its host.
#[derive(Error, Debug)]
pub enum LayerError {
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("Unsupported method {0}: only read requests are cached")]
  UnsupportedMethod(Method),

  #[error("Install manifest incomplete: {failed} of {total} resources could not be cached ({first_failure})")]
  InstallManifestIncomplete {
    failed: usize,
    total: usize,
    first_failure: String,
  },

  #[error("Cannot {action} while {state}")]
  InvalidTransition {
    action: &'static str,
    state: LifecycleState,
  },
}

/// A fetch that could not complete.
///
/// Non-success statuses are responses, not failures; this only covers
/// transport errors and invalid request targets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Network failure fetching {url}: {reason}")]
pub struct NetworkError {
  pub url: String,
  pub reason: String,
}

impl NetworkError {
  pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      reason: reason.into(),
    }
  }
}

/// Storage-side failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("Cache store {store} unavailable: {reason}")]
  Unavailable { store: String, reason: String },

  #[error("Cache store {store} was deleted; reopen it before writing")]
  Deleted { store: String },

  #[error("Quota exceeded writing to cache store {store}")]
  QuotaExceeded { store: String },

  #[error("Response with status {status} is not cacheable")]
  Uncacheable { status: u16 },
}

impl StoreError {
  pub fn unavailable(store: impl Into<String>, reason: impl std::fmt::Display) -> Self {
    Self::Unavailable {
      store: store.into(),
      reason: reason.to_string(),
    }
  }
}
