//! Last-resort responses for when neither network nor cache can answer.
//!
//! Nothing here touches storage, and nothing produced here is ever persisted.

use crate::http::{Destination, ResponseSnapshot};

/// Message of the offline error payload. Callers pattern-match on it.
pub const OFFLINE_ERROR_MESSAGE: &str = "Offline - no cached data available";

/// Status of the offline error payload.
pub const OFFLINE_STATUS: u16 = 503;

/// A 1x1 transparent GIF.
const PLACEHOLDER_GIF: &[u8] = &[
  0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
  0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
  0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Synthesize the fallback for a failed request.
pub fn resolve(destination: Destination) -> ResponseSnapshot {
  match destination {
    Destination::Image => placeholder_image(),
    Destination::Document | Destination::Other => offline_error(),
  }
}

fn placeholder_image() -> ResponseSnapshot {
  ResponseSnapshot::new(
    200,
    vec![
      ("content-type".to_string(), "image/gif".to_string()),
      ("cache-control".to_string(), "no-store".to_string()),
    ],
    PLACEHOLDER_GIF,
  )
}

/// `{"error":"Offline - no cached data available"}` with status 503.
fn offline_error() -> ResponseSnapshot {
  let body = serde_json::json!({ "error": OFFLINE_ERROR_MESSAGE }).to_string();
  ResponseSnapshot::new(
    OFFLINE_STATUS,
    vec![("content-type".to_string(), "application/json".to_string())],
    body,
  )
}
