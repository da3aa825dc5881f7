//! Best-effort hooks outside the caching core: background replay and push
//! notifications. The host displays notifications; nothing here is queued
//! or persisted.

use chrono::Utc;
use serde::Serialize;

use crate::config::NotificationConfig;

/// Tag the platform uses when connectivity comes back.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

const DEFAULT_PUSH_BODY: &str = "New content available!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Deferred actions were replayed
  Replayed,
  /// Not a tag this layer handles
  Ignored,
}

/// What the host should display for a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  /// Milliseconds since the Unix epoch
  pub date_of_arrival: i64,
  pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

pub fn notification(config: &NotificationConfig, payload: Option<&str>) -> Notification {
  let body = payload
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .unwrap_or(DEFAULT_PUSH_BODY);
  let action = |action: &str, title: &str| NotificationAction {
    action: action.to_string(),
    title: title.to_string(),
    icon: config.icon.clone(),
  };

  Notification {
    title: config.title.clone(),
    body: body.to_string(),
    icon: config.icon.clone(),
    badge: config.icon.clone(),
    vibrate: vec![100, 50, 100],
    data: NotificationData {
      date_of_arrival: Utc::now().timestamp_millis(),
      primary_key: 1,
    },
    actions: vec![action("explore", "Explore Now"), action("close", "Close")],
  }
}

/// Path to open when a notification action is clicked.
pub fn click_target(action: Option<&str>) -> Option<&'static str> {
  match action {
    Some("explore") => Some("/"),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_payload_becomes_body() {
    let n = notification(&NotificationConfig::default(), Some("Mitochondria chapter added"));
    assert_eq!(n.title, "World of Cells");
    assert_eq!(n.body, "Mitochondria chapter added");
    assert_eq!(n.actions.len(), 2);
    assert_eq!(n.actions[0].action, "explore");
  }

  #[test]
  fn test_missing_payload_uses_default_body() {
    assert_eq!(notification(&NotificationConfig::default(), None).body, DEFAULT_PUSH_BODY);
    assert_eq!(notification(&NotificationConfig::default(), Some("  ")).body, DEFAULT_PUSH_BODY);
  }

  #[test]
  fn test_serializes_like_the_platform_expects() {
    let n = notification(&NotificationConfig::default(), None);
    let json = serde_json::to_value(&n).unwrap();
    assert!(json["data"]["dateOfArrival"].is_i64());
    assert_eq!(json["data"]["primaryKey"], 1);
  }

  #[test]
  fn test_click_targets() {
    assert_eq!(click_target(Some("explore")), Some("/"));
    assert_eq!(click_target(Some("close")), None);
    assert_eq!(click_target(None), None);
  }
}
