//! Notification sink contract and the in-process broadcast implementation.
//!
//! Notifications are fire-and-forget: `broadcast` never blocks and never fails the
//! caller. [`BroadcastNotifier`] uses a bounded `tokio::sync::broadcast` ring, so a
//! subscriber that falls behind loses the oldest messages instead of stalling the
//! publisher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Result;

/// Envelope for every message the host core publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Developer-tools notification channel (debug server, dev proxy, ...)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish a JSON message; best-effort, never blocks
    fn broadcast(&self, message: Value);

    /// Whether the sink is currently able to deliver
    fn is_alive(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }
}

/// Publish a typed notification on any sink
pub fn publish(sink: &dyn NotificationSink, kind: &str, payload: Value) {
    sink.broadcast(Notification::new(kind, payload).to_json());
}

/// In-process notification server backed by a bounded broadcast channel
#[derive(Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Value>,
    running: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            running: AtomicBool::new(false),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages discarded because the notifier was stopped
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(crate::constants::defaults::NOTIFICATION_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    fn broadcast(&self, message: Value) {
        if !self.running.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("NOTIFY: Notifier stopped, dropping message");
            return;
        }

        // No subscribers is not an error for fire-and-forget delivery
        let _ = self.sender.send(message);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("NOTIFY: Notification server started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("NOTIFY: Notification server stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_when_running() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.start().await.unwrap();

        publish(&notifier, "FileReloaded", json!({"path": "a.py"}));

        let message = rx.recv().await.unwrap();
        assert_eq!(message["type"], "FileReloaded");
        assert_eq!(message["payload"]["path"], "a.py");
        assert_eq!(notifier.published_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_while_stopped_is_dropped() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.broadcast(json!({"x": 1}));

        assert!(rx.try_recv().is_err());
        assert_eq!(notifier.dropped_count(), 1);
        assert!(!notifier.is_alive());
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_oldest() {
        let notifier = BroadcastNotifier::new(2);
        let mut rx = notifier.subscribe();
        notifier.start().await.unwrap();

        for i in 0..5 {
            notifier.broadcast(json!(i));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap(), json!(3));
        assert_eq!(rx.recv().await.unwrap(), json!(4));
    }

    #[tokio::test]
    async fn test_restart_keeps_notifier_alive() {
        let notifier = BroadcastNotifier::default();
        notifier.start().await.unwrap();
        notifier.restart().await.unwrap();
        assert!(notifier.is_alive());
    }
}
