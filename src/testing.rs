//! Test support: a scripted network and request helpers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

use crate::config::LayerConfig;
use crate::error::NetworkError;
use crate::http::{Network, RequestDescriptor, ResponseSnapshot};

pub const ORIGIN: &str = "https://cells.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn request(path: &str) -> RequestDescriptor {
  RequestDescriptor::get(url(path))
}

pub fn layer_config() -> Arc<LayerConfig> {
  Arc::new(LayerConfig::new(Url::parse(ORIGIN).unwrap()))
}

#[derive(Clone)]
enum Reply {
  Respond(u16, String),
  Fail,
  Hang,
  Hold(Arc<Notify>, u16, String),
}

/// A network whose answers are set per path. Unknown paths fail like an
/// unreachable host.
#[derive(Default)]
pub struct MockNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  offline: Mutex<bool>,
  calls: AtomicUsize,
  calls_by_url: Mutex<HashMap<String, usize>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self.set(path, Reply::Respond(status, body.to_string()));
  }

  pub fn fail(&self, path: &str) {
    self.set(path, Reply::Fail);
  }

  /// The fetch never resolves.
  pub fn hang(&self, path: &str) {
    self.set(path, Reply::Hang);
  }

  /// The fetch responds only after the returned gate is notified.
  pub fn hold(&self, path: &str, status: u16, body: &str) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    self.set(path, Reply::Hold(Arc::clone(&gate), status, body.to_string()));
    gate
  }

  /// Every fetch fails until `go_online`.
  pub fn go_offline(&self) {
    *self.offline.lock().unwrap() = true;
  }

  pub fn go_online(&self) {
    *self.offline.lock().unwrap() = false;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn calls_to(&self, path: &str) -> usize {
    let key = url(path).to_string();
    self.calls_by_url.lock().unwrap().get(&key).copied().unwrap_or(0)
  }

  fn set(&self, path: &str, reply: Reply) {
    self.replies.lock().unwrap().insert(url(path).to_string(), reply);
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot, NetworkError> {
    let key = request.url().to_string();
    self.calls.fetch_add(1, Ordering::SeqCst);
    *self.calls_by_url.lock().unwrap().entry(key.clone()).or_default() += 1;

    if *self.offline.lock().unwrap() {
      return Err(NetworkError::new(key, "network unreachable"));
    }

    let reply = self.replies.lock().unwrap().get(&key).cloned().unwrap_or(Reply::Fail);
    match reply {
      Reply::Respond(status, body) => Ok(text_response(status, body)),
      Reply::Fail => Err(NetworkError::new(key, "connection refused")),
      Reply::Hang => futures::future::pending().await,
      Reply::Hold(gate, status, body) => {
        gate.notified().await;
        Ok(text_response(status, body))
      }
    }
  }
}

fn text_response(status: u16, body: String) -> ResponseSnapshot {
  ResponseSnapshot::new(
    status,
    vec![("content-type".to_string(), "text/plain".to_string())],
    body,
  )
}
