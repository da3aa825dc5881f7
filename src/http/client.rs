use async_trait::async_trait;
use std::time::Duration;

use crate::error::NetworkError;

use super::types::{RequestDescriptor, ResponseSnapshot};

/// The network as seen by the strategy executors.
///
/// Any HTTP status counts as a completed fetch; only transport failures
/// are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot, NetworkError>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// Build a client. Without a timeout a fetch may stay pending indefinitely.
  pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
    let mut builder =
      reqwest::Client::builder().user_agent(concat!("cellar/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    Ok(Self {
      client: builder.build()?,
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot, NetworkError> {
    let url = request.url().as_str();

    let response = self
      .client
      .request(request.method().clone(), request.url().clone())
      .send()
      .await
      .map_err(|e| NetworkError::new(url, e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::new(url, format!("Failed to read body: {}", e)))?;

    tracing::debug!(url, status, bytes = body.len(), "Fetched from network");

    Ok(ResponseSnapshot::new(status, headers, body.to_vec()))
  }
}
