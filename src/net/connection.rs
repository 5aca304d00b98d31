//! Connection handles and server traffic counters

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Stable identifier for a live connection. The broadcast bus keys its
/// subscriber set on ids, never on the socket itself.
pub type ConnectionId = u64;

/// Cheap clonable handle to one connection's outbound queue.
///
/// The queue is the only write path to the socket: replies and broadcasts
/// both land here, and the writer task drains it frame by frame, so
/// frames never interleave on the wire and leave in enqueue order.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    sender: mpsc::Sender<Vec<u8>>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id, addr, sender }
    }

    /// Enqueue a reply frame, waiting for queue space. `false` means the
    /// connection is gone and the caller should wind down.
    pub async fn enqueue(&self, frame: Vec<u8>) -> bool {
        self.sender.send(frame).await.is_ok()
    }

    /// Enqueue a broadcast frame without waiting. A full queue or a dead
    /// connection drops the frame for this connection only.
    pub fn try_enqueue(&self, frame: Vec<u8>) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}

/// Whole-server traffic counters, shared with the status task.
#[derive(Default)]
pub struct ServerStats {
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
}

impl ServerStats {
    pub fn record_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_connections(&self) -> u64 {
        self.connections_opened
            .load(Ordering::Relaxed)
            .saturating_sub(self.connections_closed.load(Ordering::Relaxed))
    }
}
