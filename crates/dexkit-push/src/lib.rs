//! # Dexkit Push Pipeline
//!
//! Receives server-pushed payloads, displays a system notification, and
//! relays the payload to every open application instance.
//!
//! ## Behavior
//!
//! - Payloads parse as JSON; anything unparsable becomes the plain-text
//!   `body` of a default notification. A push is never dropped.
//! - Parsed fields merge over documented defaults through an explicit typed
//!   merge; unknown fields from the sender are discarded, never forwarded.
//! - Receipt has two order-independent side effects: a
//!   `PUSH_NOTIFICATION_RECEIVED` broadcast and a displayed notification
//!   with "view" and "dismiss" actions.
//! - A click on "dismiss" just closes; any other action resolves the
//!   payload's `data.url` (default `/`), focuses an instance already showing
//!   it, or opens a new one.

use dexkit_bridge::{BridgeMessage, BridgePayload, ClientId, ClientRegistry};
use dexkit_sw::now_ms;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

// ==================== Errors ====================

/// Push pipeline errors. Parse failures are not errors; they degrade to a
/// plain-text notification.
#[derive(Error, Debug, Clone)]
pub enum PushError {
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Display error: {0}")]
    Display(String),
}

// ==================== Payload ====================

/// A push payload after merging over defaults. `data` is opaque and
/// forwarded verbatim; the known convention is `{"url": "..."}` for
/// click-through navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern, ms on/off.
    pub vibrate: Vec<u32>,
    pub data: serde_json::Value,
}

impl Default for PushPayload {
    fn default() -> Self {
        Self {
            title: "Dexwave".to_string(),
            body: "New content is available!".to_string(),
            icon: "/assets/icons/icon-192.png".to_string(),
            badge: "/assets/icons/badge-72.png".to_string(),
            vibrate: vec![100, 50, 100],
            data: serde_json::json!({
                "dateOfArrival": now_ms(),
                "primaryKey": 1,
            }),
        }
    }
}

/// Lenient wire shape: every field optional, unknown fields ignored here and
/// dropped by the merge.
#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    badge: Option<String>,
    vibrate: Option<Vec<u32>>,
    data: Option<serde_json::Value>,
}

impl PushPayload {
    /// Explicit field-by-field merge of a parsed payload over defaults.
    fn merged_over_defaults(raw: RawPayload) -> Self {
        let mut payload = Self::default();
        if let Some(title) = raw.title {
            payload.title = title;
        }
        if let Some(body) = raw.body {
            payload.body = body;
        }
        if let Some(icon) = raw.icon {
            payload.icon = icon;
        }
        if let Some(badge) = raw.badge {
            payload.badge = badge;
        }
        if let Some(vibrate) = raw.vibrate {
            payload.vibrate = vibrate;
        }
        if let Some(data) = raw.data {
            payload.data = data;
        }
        payload
    }

    /// Build the displayable notification, with the two standard actions.
    pub fn to_notification(&self) -> Notification {
        Notification {
            title: self.title.clone(),
            body: self.body.clone(),
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            vibrate: self.vibrate.clone(),
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: "View".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
            data: self.data.clone(),
        }
    }
}

/// Parse a raw push payload, falling back to plain text on parse failure.
pub fn parse_payload(raw: &str) -> PushPayload {
    if raw.trim().is_empty() {
        return PushPayload::default();
    }

    match serde_json::from_str::<RawPayload>(raw) {
        Ok(parsed) => PushPayload::merged_over_defaults(parsed),
        Err(err) => {
            debug!(error = %err, "push payload is not JSON, using raw text as body");
            PushPayload {
                body: raw.to_string(),
                ..Default::default()
            }
        }
    }
}

// ==================== Notifications ====================

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// A notification action button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A displayable system notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    pub data: serde_json::Value,
}

/// The system notification surface.
pub trait NotificationCenter: Send + Sync {
    fn show(&self, notification: Notification) -> Result<(), PushError>;
}

/// In-memory notification surface recording everything shown.
#[derive(Debug, Default)]
pub struct MemoryNotificationCenter {
    shown: Mutex<Vec<Notification>>,
}

impl MemoryNotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl NotificationCenter for MemoryNotificationCenter {
    fn show(&self, notification: Notification) -> Result<(), PushError> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        Ok(())
    }
}

// ==================== Pipeline ====================

/// Handle an inbound push event: broadcast to every open instance and show
/// the system notification. Both effects are attempted regardless of the
/// other's outcome.
pub async fn handle_push(
    raw: &str,
    clients: &ClientRegistry,
    notifications: &dyn NotificationCenter,
) -> Result<PushPayload, PushError> {
    let payload = parse_payload(raw);

    let value = serde_json::to_value(&payload).map_err(|e| PushError::Encode(e.to_string()))?;
    let message = BridgeMessage::new(BridgePayload::PushNotificationReceived {
        notification: value,
    });
    let delivered = clients.publish(&message).await;

    let display_result = notifications.show(payload.to_notification());

    info!(title = %payload.title, delivered, "push handled");
    display_result?;
    Ok(payload)
}

/// Outcome of a notification click.
#[derive(Debug)]
pub enum ClickOutcome {
    /// "dismiss" closed the notification; nothing else happens.
    Dismissed,
    /// An existing instance already showing the target URL was focused.
    Focused(ClientId),
    /// A new instance was opened on the target URL.
    Opened(ClientId, mpsc::UnboundedReceiver<BridgeMessage>),
}

/// Route a notification click. `origin` anchors relative `data.url` targets.
pub async fn handle_notification_click(
    action: &str,
    payload: &PushPayload,
    origin: &Url,
    clients: &ClientRegistry,
) -> Result<ClickOutcome, PushError> {
    if action == ACTION_DISMISS {
        debug!("notification dismissed");
        return Ok(ClickOutcome::Dismissed);
    }

    let target = payload
        .data
        .get("url")
        .and_then(|v| v.as_str())
        .unwrap_or("/");
    let target_url = origin
        .join(target)
        .map_err(|e| PushError::InvalidUrl(e.to_string()))?;

    if let Some(id) = clients.find_by_url(&target_url).await {
        clients
            .focus(id)
            .await
            .map_err(|e| PushError::Client(e.to_string()))?;
        info!(url = %target_url, ?id, "focused existing instance");
        return Ok(ClickOutcome::Focused(id));
    }

    let (id, rx) = clients.connect(target_url.clone()).await;
    clients
        .focus(id)
        .await
        .map_err(|e| PushError::Client(e.to_string()))?;
    info!(url = %target_url, ?id, "opened new instance");
    Ok(ClickOutcome::Opened(id, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_merges_over_defaults() {
        let payload = parse_payload(r#"{"title": "Update", "body": "New data"}"#);

        assert_eq!(payload.title, "Update");
        assert_eq!(payload.body, "New data");
        // Unset fields keep the documented defaults.
        assert_eq!(payload.icon, "/assets/icons/icon-192.png");
        assert_eq!(payload.badge, "/assets/icons/badge-72.png");
        assert_eq!(payload.vibrate, vec![100, 50, 100]);
        assert!(payload.data.get("dateOfArrival").is_some());
        assert_eq!(payload.data["primaryKey"], 1);
    }

    #[test]
    fn test_parse_falls_back_to_plain_text() {
        let payload = parse_payload("server going down at midnight");
        assert_eq!(payload.body, "server going down at midnight");
        assert_eq!(payload.title, "Dexwave");
    }

    #[test]
    fn test_empty_payload_is_all_defaults() {
        let payload = parse_payload("   ");
        assert_eq!(payload, PushPayload { data: payload.data.clone(), ..Default::default() });
        assert_eq!(payload.body, "New content is available!");
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let payload = parse_payload(r#"{"title": "x", "injected": "evil"}"#);
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("injected").is_none());
    }

    #[test]
    fn test_notification_actions() {
        let notification = PushPayload::default().to_notification();
        let actions: Vec<&str> = notification
            .actions
            .iter()
            .map(|a| a.action.as_str())
            .collect();
        assert_eq!(actions, vec!["view", "dismiss"]);
    }

    #[tokio::test]
    async fn test_handle_push_broadcasts_and_displays() {
        let clients = ClientRegistry::new();
        let center = MemoryNotificationCenter::new();
        let (_id, mut rx) = clients
            .connect(Url::parse("https://app.example/").unwrap())
            .await;

        let payload = handle_push(r#"{"title": "Update"}"#, &clients, &center)
            .await
            .unwrap();
        assert_eq!(payload.title, "Update");

        // Broadcast carries the full merged payload.
        let message = rx.recv().await.unwrap();
        match message.payload {
            BridgePayload::PushNotificationReceived { notification } => {
                assert_eq!(notification["title"], "Update");
                assert_eq!(notification["vibrate"], serde_json::json!([100, 50, 100]));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        // Notification displayed with both actions.
        let shown = center.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Update");
        assert_eq!(shown[0].actions.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_push_is_never_dropped() {
        let clients = ClientRegistry::new();
        let center = MemoryNotificationCenter::new();

        handle_push("{not json", &clients, &center).await.unwrap();

        let shown = center.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].body, "{not json");
    }

    #[tokio::test]
    async fn test_click_dismiss_does_nothing() {
        let clients = ClientRegistry::new();
        let origin = Url::parse("https://app.example/").unwrap();
        let payload = PushPayload::default();

        let outcome = handle_notification_click(ACTION_DISMISS, &payload, &origin, &clients)
            .await
            .unwrap();
        assert!(matches!(outcome, ClickOutcome::Dismissed));
        assert_eq!(clients.count().await, 0);
    }

    #[tokio::test]
    async fn test_click_focuses_matching_instance() {
        let clients = ClientRegistry::new();
        let origin = Url::parse("https://app.example/").unwrap();
        let detail = Url::parse("https://app.example/detail/7").unwrap();
        let (existing, _rx) = clients.connect(detail).await;

        let payload = PushPayload {
            data: serde_json::json!({"url": "/detail/7"}),
            ..Default::default()
        };

        let outcome = handle_notification_click(ACTION_VIEW, &payload, &origin, &clients)
            .await
            .unwrap();
        match outcome {
            ClickOutcome::Focused(id) => assert_eq!(id, existing),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let snapshot = clients.snapshot().await;
        assert!(snapshot.iter().any(|c| c.id == existing && c.focused));
    }

    #[tokio::test]
    async fn test_click_opens_when_no_match() {
        let clients = ClientRegistry::new();
        let origin = Url::parse("https://app.example/").unwrap();
        let payload = PushPayload::default();

        // Default click (no action string) with no data.url targets "/".
        let outcome = handle_notification_click("", &payload, &origin, &clients)
            .await
            .unwrap();
        match outcome {
            ClickOutcome::Opened(id, _rx) => {
                let snapshot = clients.snapshot().await;
                let opened = snapshot.iter().find(|c| c.id == id).unwrap();
                assert_eq!(opened.url.path(), "/");
                assert!(opened.focused);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
