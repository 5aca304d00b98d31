//! Expiration broadcast bus
//!
//! Tracks the live connections and fans server-initiated frames out to
//! all of them. Delivery is best-effort per connection: a slow client
//! with a full write queue misses the event, everyone else still gets
//! it, and the connection stays up.

use super::connection::{ConnectionHandle, ConnectionId};
use super::frame::encode_frame;
use super::wire::{BROADCAST_CORRELATION_ID, EXPIRE_BROADCAST_PREFIX};
use crate::command::MessageType;
use crate::store::ExpireSink;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Server-initiated event delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastEvent {
    /// `key` left the cache (expiry, eviction, replacement, or removal of
    /// an entry that asked to be announced).
    Expire { key: String },
}

impl BroadcastEvent {
    /// Render the literal payload carried by the broadcast frame.
    pub fn render_payload(&self) -> Vec<u8> {
        match self {
            BroadcastEvent::Expire { key } => {
                let mut out = vec![MessageType::Literal.code()];
                out.extend_from_slice(EXPIRE_BROADCAST_PREFIX.as_bytes());
                out.extend_from_slice(key.as_bytes());
                out
            }
        }
    }

    /// Parse a broadcast frame payload back into an event (client side).
    pub fn parse_payload(payload: &[u8]) -> Option<Self> {
        let (_, body) = payload.split_first()?;
        let text = std::str::from_utf8(body).ok()?;
        let key = text.strip_prefix(EXPIRE_BROADCAST_PREFIX)?;
        Some(BroadcastEvent::Expire { key: key.to_string() })
    }
}

/// Registry of live connections and the fanout path to them.
#[derive(Default)]
pub struct BroadcastBus {
    subscribers: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    dropped: AtomicU64,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handle: ConnectionHandle) {
        self.subscribers.lock().unwrap().insert(handle.id, handle);
    }

    pub fn unsubscribe(&self, id: ConnectionId) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Broadcast frames dropped on full or dead queues, lifetime total.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue `event` on every live connection's write queue.
    pub fn broadcast(&self, event: &BroadcastEvent) {
        let frame = encode_frame(BROADCAST_CORRELATION_ID, &event.render_payload());
        let subscribers = self.subscribers.lock().unwrap();
        for handle in subscribers.values() {
            if !handle.try_enqueue(frame.clone()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("dropped broadcast for connection {}", handle.id);
            }
        }
    }
}

impl ExpireSink for BroadcastBus {
    fn entry_expired(&self, key: &str) {
        self.broadcast(&BroadcastEvent::Expire { key: key.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(id: ConnectionId, depth: usize) -> (ConnectionHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(depth);
        let addr = "127.0.0.1:0".parse().unwrap();
        (ConnectionHandle::new(id, addr, tx), rx)
    }

    #[test]
    fn test_payload_round_trip() {
        let event = BroadcastEvent::Expire { key: "k3".into() };
        let payload = event.render_payload();
        assert_eq!(payload[0], MessageType::Literal.code());
        assert_eq!(&payload[1..], b"expire k3");
        assert_eq!(BroadcastEvent::parse_payload(&payload).unwrap(), event);
    }

    #[tokio::test]
    async fn test_fanout_reaches_all_subscribers() {
        let bus = BroadcastBus::new();
        let (h1, mut rx1) = handle(1, 4);
        let (h2, mut rx2) = handle(2, 4);
        bus.subscribe(h1);
        bus.subscribe(h2);

        bus.broadcast(&BroadcastEvent::Expire { key: "k".into() });
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_connection_only() {
        let bus = BroadcastBus::new();
        let (slow, _slow_rx) = handle(1, 1);
        let (fast, mut fast_rx) = handle(2, 4);
        bus.subscribe(slow);
        bus.subscribe(fast);

        bus.broadcast(&BroadcastEvent::Expire { key: "a".into() });
        bus.broadcast(&BroadcastEvent::Expire { key: "b".into() });

        // The slow queue held one frame and dropped the second.
        assert_eq!(bus.dropped_count(), 1);
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribed_connection_not_written() {
        let bus = BroadcastBus::new();
        let (h, mut rx) = handle(1, 4);
        bus.subscribe(h);
        bus.unsubscribe(1);

        bus.broadcast(&BroadcastEvent::Expire { key: "k".into() });
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
