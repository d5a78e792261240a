//! Notification bus: per-channel broadcast of transition outcomes.
//!
//! Delivery is at-most-once and best-effort per subscriber. Channels are
//! bounded; a slow subscriber lags and drops events rather than applying
//! backpressure to publishers. Streams emit keepalive markers while idle so
//! transport-level timeouts are not triggered by quiescence.
//!
//! The bus is an explicit instance handed to the components that need it,
//! with its lifetime tied to process startup — there is no lazily
//! initialized global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

/// Event published to a channel and fanned out to live subscribers.
/// Not persisted beyond the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Topic-style kind, e.g. `"transition.applied"`.
    pub kind: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: &str, entity_id: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            entity_id: entity_id.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// One item yielded by a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Notification),
    /// Emitted when the keepalive interval elapses with no event.
    Keepalive,
}

impl StreamItem {
    /// Serialize as one server-sent-events frame: events become a
    /// `data: <json>` line, keepalives a comment line.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamItem::Event(n) => Ok(format!("data: {}\n\n", serde_json::to_string(n)?)),
            StreamItem::Keepalive => Ok(": keepalive\n\n".to_string()),
        }
    }
}

/// Publish/subscribe fan-out keyed by channel (typically the entity id).
#[derive(Clone)]
pub struct NotificationBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Notification>>>>,
    capacity: usize,
    keepalive: Duration,
}

impl NotificationBus {
    pub fn new(capacity: usize, keepalive: Duration) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            keepalive,
        }
    }

    /// Broadcast to every live subscriber of `channel`. Never blocks on
    /// subscriber drain; returns the number of subscribers reached.
    ///
    /// A channel whose last subscriber has gone is pruned here, so
    /// unsubscribing is nothing more than dropping the [`Subscription`].
    pub async fn publish(&self, channel: &str, notification: Notification) -> usize {
        let mut channels = self.channels.lock().await;
        let Some(tx) = channels.get(channel) else {
            return 0;
        };
        match tx.send(notification) {
            Ok(reached) => reached,
            Err(_) => {
                channels.remove(channel);
                0
            }
        }
    }

    /// Open a subscription stream on `channel`. Many concurrent subscribers
    /// per channel are supported; each gets its own buffered view.
    pub async fn subscribe(&self, channel: &str) -> Subscription {
        let mut channels = self.channels.lock().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            rx: tx.subscribe(),
            keepalive: self.keepalive,
        }
    }

    /// Number of channels with at least one sender entry.
    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}

/// A single subscriber's stream. Dropping it is the unsubscribe.
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    keepalive: Duration,
}

impl Subscription {
    /// Await the next event or the keepalive timeout, whichever comes first.
    ///
    /// A lagged receiver silently skips the dropped events and keeps
    /// reading. Returns `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            match tokio::time::timeout(self.keepalive, self.rx.recv()).await {
                Ok(Ok(notification)) => return Some(StreamItem::Event(notification)),
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    debug!(skipped, "subscriber lagged; events dropped");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return Some(StreamItem::Keepalive),
            }
        }
    }
}
