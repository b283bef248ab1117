//! # Dexkit Message Bridge
//!
//! Typed, at-most-once message passing between the interception worker and
//! every open application instance.
//!
//! ## Features
//!
//! - **Tagged messages**: `SYNC_COMPLETE`, `USER_MESSAGE`,
//!   `USER_MESSAGE_RESPONSE`, `PUSH_NOTIFICATION_RECEIVED`
//! - **Client registry**: connected application instances with focus state
//! - **`publish`**: the single broadcast primitive every fan-out goes through
//! - **User messages**: keyword-classified acknowledgements, with "sync"
//!   arming the catalog sync task
//!
//! Messages crossing the boundary are owned copies; no state is shared
//! between the worker and a view.

use std::sync::atomic::{AtomicU64, Ordering};

use dexkit_sw::{now_ms, SyncRegistry, SyncTag};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use url::Url;

// ==================== Errors ====================

/// Bridge errors.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Client not found: {0:?}")]
    ClientNotFound(ClientId),

    #[error("Client disconnected: {0:?}")]
    ClientGone(ClientId),
}

// ==================== Messages ====================

/// The tagged payload of a bridge message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgePayload {
    /// Worker -> app: a background sync finished.
    #[serde(rename = "SYNC_COMPLETE")]
    SyncComplete { data: serde_json::Value },

    /// App -> worker: free-text user message.
    #[serde(rename = "USER_MESSAGE")]
    UserMessage { data: String },

    /// Worker -> app: acknowledgement of a user message.
    #[serde(rename = "USER_MESSAGE_RESPONSE")]
    UserMessageResponse { data: String },

    /// Worker -> app: a push payload arrived.
    #[serde(rename = "PUSH_NOTIFICATION_RECEIVED")]
    PushNotificationReceived { notification: serde_json::Value },
}

/// A complete bridge envelope: tagged payload plus send timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    #[serde(flatten)]
    pub payload: BridgePayload,

    /// Milliseconds since epoch at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl BridgeMessage {
    /// Create a message stamped with the current time.
    pub fn new(payload: BridgePayload) -> Self {
        Self {
            payload,
            timestamp: Some(now_ms()),
        }
    }
}

// ==================== Clients ====================

/// Unique identifier for a connected application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct ClientEntry {
    url: Url,
    focused: bool,
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

/// Observable view of a connected client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: Url,
    pub focused: bool,
}

/// The set of currently-connected application instances.
///
/// All worker-side fan-out (sync completion, push receipt, message replies)
/// goes through [`ClientRegistry::publish`]; callers never enumerate
/// instances themselves.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an application instance showing the given URL. Returns its id
    /// and the receiving end of its message channel.
    pub async fn connect(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<BridgeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();

        let mut clients = self.clients.write().await;
        clients.insert(
            id,
            ClientEntry {
                url: url.clone(),
                focused: false,
                tx,
            },
        );
        info!(?id, url = %url, "client connected");
        (id, rx)
    }

    /// Remove a client. Returns whether it was connected.
    pub async fn disconnect(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id).is_some();
        if removed {
            info!(?id, "client disconnected");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Find a client already showing the given URL (host + path match).
    pub async fn find_by_url(&self, url: &Url) -> Option<ClientId> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .find(|(_, entry)| {
                entry.url.host_str() == url.host_str() && entry.url.path() == url.path()
            })
            .map(|(id, _)| *id)
    }

    /// Give a client focus, clearing it from the others.
    pub async fn focus(&self, id: ClientId) -> Result<(), BridgeError> {
        let mut clients = self.clients.write().await;
        if !clients.contains_key(&id) {
            return Err(BridgeError::ClientNotFound(id));
        }
        for (entry_id, entry) in clients.iter_mut() {
            entry.focused = *entry_id == id;
        }
        Ok(())
    }

    /// Send a direct message to one client.
    pub async fn send_to(&self, id: ClientId, message: &BridgeMessage) -> Result<(), BridgeError> {
        let clients = self.clients.read().await;
        let entry = clients.get(&id).ok_or(BridgeError::ClientNotFound(id))?;
        entry
            .tx
            .send(message.clone())
            .map_err(|_| BridgeError::ClientGone(id))
    }

    /// Broadcast a message to every connected instance; each receives its own
    /// copy. Clients whose channel has closed are pruned. Returns the number
    /// of deliveries.
    pub async fn publish(&self, message: &BridgeMessage) -> usize {
        let mut clients = self.clients.write().await;
        let mut gone = Vec::new();
        let mut delivered = 0;

        for (id, entry) in clients.iter() {
            match entry.tx.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => gone.push(*id),
            }
        }

        for id in gone {
            warn!(?id, "pruning disconnected client");
            clients.remove(&id);
        }

        debug!(delivered, "message published");
        delivered
    }

    /// Snapshot of connected clients.
    pub async fn snapshot(&self) -> Vec<ClientInfo> {
        let clients = self.clients.read().await;
        let mut infos: Vec<ClientInfo> = clients
            .iter()
            .map(|(id, entry)| ClientInfo {
                id: *id,
                url: entry.url.clone(),
                focused: entry.focused,
            })
            .collect();
        infos.sort_by_key(|info| info.id.0);
        infos
    }
}

// ==================== User messages ====================

/// An inbound free-text message from an application instance, with an
/// optional direct reply channel.
#[derive(Debug)]
pub struct UserMessage {
    pub text: String,
    pub reply: Option<oneshot::Sender<BridgeMessage>>,
}

impl UserMessage {
    /// A message with no reply channel.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply: None,
        }
    }

    /// A message carrying a direct reply channel.
    pub fn with_reply(text: impl Into<String>) -> (Self, oneshot::Receiver<BridgeMessage>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                text: text.into(),
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Classify a user message by keyword, acknowledge it, and fan the reply out.
///
/// The response goes to the direct reply channel (when supplied) and is also
/// broadcast, so every open instance observes every reply. A message
/// containing "sync" additionally arms the catalog sync task.
pub async fn handle_user_message(
    message: UserMessage,
    registry: &ClientRegistry,
    sync: &SyncRegistry,
) -> BridgeMessage {
    let lower = message.text.to_lowercase();

    let ack = if lower.contains("pokemon") {
        "Gotta catch 'em all! The catalog is ready when you are.".to_string()
    } else if lower.contains("cache") {
        "Cached pages are served first; fresh data lands in the background.".to_string()
    } else if lower.contains("sync") {
        sync.register(SyncTag::CatalogSync);
        "Catalog sync scheduled.".to_string()
    } else {
        format!("Message received: {}", message.text)
    };

    debug!(text = %message.text, ack = %ack, "user message handled");

    let response = BridgeMessage::new(BridgePayload::UserMessageResponse { data: ack });

    if let Some(reply) = message.reply {
        let _ = reply.send(response.clone());
    }
    registry.publish(&response).await;

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_url() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[test]
    fn test_message_wire_format() {
        let message = BridgeMessage::new(BridgePayload::SyncComplete {
            data: serde_json::json!({"updated": 10}),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "SYNC_COMPLETE");
        assert_eq!(value["data"]["updated"], 10);
        assert!(value["timestamp"].is_u64());

        let parsed: BridgeMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_push_message_uses_notification_key() {
        let message = BridgeMessage::new(BridgePayload::PushNotificationReceived {
            notification: serde_json::json!({"title": "Update"}),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "PUSH_NOTIFICATION_RECEIVED");
        assert_eq!(value["notification"]["title"], "Update");
    }

    #[test]
    fn test_user_message_wire_format() {
        let raw = r#"{"type": "USER_MESSAGE", "data": "hello"}"#;
        let parsed: BridgeMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.payload,
            BridgePayload::UserMessage {
                data: "hello".to_string()
            }
        );
        assert_eq!(parsed.timestamp, None);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_client() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_a) = registry.connect(app_url()).await;
        let (_b, mut rx_b) = registry.connect(app_url()).await;

        let message = BridgeMessage::new(BridgePayload::SyncComplete {
            data: serde_json::Value::Null,
        });
        let delivered = registry.publish(&message).await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_a.recv().await.unwrap().payload, message.payload);
        assert_eq!(rx_b.recv().await.unwrap().payload, message.payload);
    }

    #[tokio::test]
    async fn test_publish_prunes_closed_clients() {
        let registry = ClientRegistry::new();
        let (_a, rx_a) = registry.connect(app_url()).await;
        let (_b, _rx_b) = registry.connect(app_url()).await;
        drop(rx_a);

        let message = BridgeMessage::new(BridgePayload::SyncComplete {
            data: serde_json::Value::Null,
        });
        let delivered = registry.publish(&message).await;

        assert_eq!(delivered, 1);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_focus_is_exclusive() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = registry.connect(app_url()).await;
        let (b, _rx_b) = registry.connect(app_url()).await;

        registry.focus(a).await.unwrap();
        registry.focus(b).await.unwrap();

        let snapshot = registry.snapshot().await;
        let focused: Vec<ClientId> = snapshot
            .iter()
            .filter(|c| c.focused)
            .map(|c| c.id)
            .collect();
        assert_eq!(focused, vec![b]);
    }

    #[tokio::test]
    async fn test_find_by_url() {
        let registry = ClientRegistry::new();
        let detail = Url::parse("https://app.example/detail/7").unwrap();
        let (id, _rx) = registry.connect(detail.clone()).await;
        let (_other, _rx2) = registry.connect(app_url()).await;

        assert_eq!(registry.find_by_url(&detail).await, Some(id));
        let missing = Url::parse("https://app.example/missing").unwrap();
        assert_eq!(registry.find_by_url(&missing).await, None);
    }

    #[tokio::test]
    async fn test_sync_keyword_registers_task_and_replies() {
        let registry = ClientRegistry::new();
        let sync = SyncRegistry::new();
        let (_id, mut rx) = registry.connect(app_url()).await;

        let (message, reply_rx) = UserMessage::with_reply("please sync now");
        let response = handle_user_message(message, &registry, &sync).await;

        assert!(sync.is_pending(SyncTag::CatalogSync));
        assert!(matches!(
            response.payload,
            BridgePayload::UserMessageResponse { .. }
        ));

        // Direct reply and broadcast both carry the same response.
        assert_eq!(reply_rx.await.unwrap().payload, response.payload);
        assert_eq!(rx.recv().await.unwrap().payload, response.payload);
    }

    #[tokio::test]
    async fn test_generic_message_registers_nothing() {
        let registry = ClientRegistry::new();
        let sync = SyncRegistry::new();

        let response =
            handle_user_message(UserMessage::new("hello there"), &registry, &sync).await;

        assert!(sync.is_empty());
        match response.payload {
            BridgePayload::UserMessageResponse { data } => {
                assert_eq!(data, "Message received: hello there");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keyword_precedence() {
        let registry = ClientRegistry::new();
        let sync = SyncRegistry::new();

        let themed =
            handle_user_message(UserMessage::new("which pokemon?"), &registry, &sync).await;
        let cache_ack =
            handle_user_message(UserMessage::new("clear the cache"), &registry, &sync).await;

        for response in [&themed, &cache_ack] {
            assert!(matches!(
                response.payload,
                BridgePayload::UserMessageResponse { .. }
            ));
        }
        // Neither themed nor cache acknowledgements arm the sync task.
        assert!(sync.is_empty());
    }
}
