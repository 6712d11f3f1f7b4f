use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

/// A channel-addressed event published on the bus. Connections filter by
/// their subscribed channel set before forwarding to the client.
#[derive(Debug, Clone)]
pub struct Published {
    pub channel: String,
    pub event: String,
    pub data: serde_json::Value,
}

/// The realtime bus. Fire-and-forget: mutation success never waits on
/// delivery, and a publish with no listeners is not an error.
///
/// Ordering holds per channel (publish order); nothing is guaranteed across
/// channels.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<Published>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to the raw event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to a channel.
    pub fn publish<T: Serialize>(&self, channel: &str, event: &str, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("Unserializable payload on {}/{}: {}", channel, event, e);
                return;
            }
        };
        let _ = self.inner.broadcast_tx.send(Published {
            channel: channel.to_string(),
            event: event.to_string(),
            data,
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
