//! Transient in-page toasts raised from push notifications.
//!
//! When a push notification is relayed over the client bridge the page
//! surfaces it as a toast that auto-expires after [`TOAST_TTL`] unless
//! the user dismisses it first.

use dexkit_bridge::{BridgeMessage, BridgePayload};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a toast stays on screen before it expires.
pub const TOAST_TTL: Duration = Duration::from_secs(5);

/// A single on-screen toast.
#[derive(Debug, Clone)]
pub struct Toast {
    pub id: u64,
    pub title: String,
    pub body: String,
    /// Opaque payload data carried along for click handling.
    pub data: serde_json::Value,
    pub created_at: Instant,
}

/// Holds the active toasts for one page.
#[derive(Debug)]
pub struct ToastStore {
    toasts: Vec<Toast>,
    ttl: Duration,
    next_id: u64,
}

impl Default for ToastStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ToastStore {
    pub fn new() -> Self {
        Self::with_ttl(TOAST_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            toasts: Vec::new(),
            ttl,
            next_id: 1,
        }
    }

    /// Raise a toast for a relayed push notification. Messages of any
    /// other kind are ignored; returns the new toast's id when one was
    /// created.
    pub fn apply_message(&mut self, message: &BridgeMessage) -> Option<u64> {
        let BridgePayload::PushNotificationReceived { notification } = &message.payload else {
            return None;
        };

        let title = notification
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Notification")
            .to_string();
        let body = notification
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let data = notification
            .get("data")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let id = self.next_id;
        self.next_id += 1;
        debug!(id, title = %title, "toast raised");
        self.toasts.push(Toast {
            id,
            title,
            body,
            data,
            created_at: Instant::now(),
        });
        Some(id)
    }

    /// User dismissed a toast. Returns whether it was still showing.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.id != id);
        self.toasts.len() < before
    }

    /// Drop every toast whose TTL has elapsed as of `now`. Returns how
    /// many were purged.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.toasts.len();
        self.toasts.retain(|t| now < t.created_at + ttl);
        before - self.toasts.len()
    }

    pub fn active(&self) -> &[Toast] {
        &self.toasts
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }
}
