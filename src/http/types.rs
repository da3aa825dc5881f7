use chrono::{DateTime, Utc};
use reqwest::Method;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Destination {
  Document,
  Image,
  #[default]
  Other,
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Document => "document",
      Self::Image => "image",
      Self::Other => "other",
    };
    f.write_str(name)
  }
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "document" => Ok(Self::Document),
      "image" => Ok(Self::Image),
      "other" | "" => Ok(Self::Other),
      other => Err(format!("Unknown destination '{}'", other)),
    }
  }
}

/// An intercepted request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
  method: Method,
  url: Url,
  destination: Destination,
}

impl RequestDescriptor {
  pub fn new(method: Method, url: Url, destination: Destination) -> Self {
    Self {
      method,
      url,
      destination,
    }
  }

  /// A GET request with no particular destination.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url, Destination::Other)
  }

  pub fn with_destination(self, destination: Destination) -> Self {
    Self {
      destination,
      ..self
    }
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn destination(&self) -> Destination {
    self.destination
  }

  /// Only GET requests are read requests.
  pub fn is_read(&self) -> bool {
    self.method == Method::GET
  }

  /// Key the request is stored under: the absolute URL without its fragment.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }

  /// Looser key that ignores the query string.
  pub fn variant_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.to_string()
  }
}

/// An immutable captured copy of a response, safe to replay later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub captured_at: DateTime<Utc>,
}

impl ResponseSnapshot {
  /// Capture a response now.
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
      captured_at: Utc::now(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only complete, successful bodies may be persisted. 206 never is.
  pub fn is_cacheable(&self) -> bool {
    self.is_success() && self.status != 206
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  /// Approximate storage footprint in bytes.
  pub fn size(&self) -> usize {
    self.body.len()
      + self
        .headers
        .iter()
        .map(|(k, v)| k.len() + v.len())
        .sum::<usize>()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_cache_key_drops_fragment() {
    let request = RequestDescriptor::get(url("https://cells.test/api/cells?page=2#top"));
    assert_eq!(request.cache_key(), "https://cells.test/api/cells?page=2");
    assert_eq!(request.variant_key(), "https://cells.test/api/cells");
  }

  #[test]
  fn test_only_get_is_read() {
    let get = RequestDescriptor::get(url("https://cells.test/"));
    let post = RequestDescriptor::new(Method::POST, url("https://cells.test/"), Destination::Other);
    assert!(get.is_read());
    assert!(!post.is_read());
  }

  #[test]
  fn test_partial_content_is_not_cacheable() {
    assert!(ResponseSnapshot::new(200, vec![], "ok").is_cacheable());
    assert!(ResponseSnapshot::new(204, vec![], "").is_cacheable());
    assert!(!ResponseSnapshot::new(206, vec![], "part").is_cacheable());
    assert!(!ResponseSnapshot::new(404, vec![], "").is_cacheable());
    assert!(!ResponseSnapshot::new(304, vec![], "").is_cacheable());
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let snapshot = ResponseSnapshot::new(
      200,
      vec![("Content-Type".to_string(), "text/html".to_string())],
      "<html></html>",
    );
    assert_eq!(snapshot.content_type(), Some("text/html"));
    assert_eq!(snapshot.header("x-missing"), None);
  }

  #[test]
  fn test_destination_parse() {
    assert_eq!("image".parse::<Destination>(), Ok(Destination::Image));
    assert_eq!("Document".parse::<Destination>(), Ok(Destination::Document));
    assert!("script".parse::<Destination>().is_err());
  }
}
