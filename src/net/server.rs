//! TCP connection server
//!
//! Accepts sessions behind a counting semaphore sized to the connection
//! cap: the permit is taken before the accept resolves, so a connect
//! beyond the limit sits in the backlog until an older session closes.
//! Each session runs a reader task (decode, dispatch, enqueue reply) and
//! a writer task (drain the outbound queue); any failure on either side
//! tears the session down without touching its neighbors.

use super::broadcast::BroadcastBus;
use super::connection::{ConnectionHandle, ServerStats};
use super::error::NetError;
use super::frame::{encode_frame, FrameDecoder};
use super::wire::WRITE_QUEUE_DEPTH;
use crate::command::Dispatcher;
use crate::config::CacheConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// The accept loop and per-connection session plumbing.
pub struct CacheServer {
    cfg: Arc<CacheConfig>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<BroadcastBus>,
    stats: Arc<ServerStats>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl CacheServer {
    pub fn new(
        cfg: Arc<CacheConfig>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<BroadcastBus>,
        stats: Arc<ServerStats>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.maximum_connections));
        Self {
            cfg,
            dispatcher,
            bus,
            stats,
            permits,
            next_id: AtomicU64::new(1),
        }
    }

    /// Run the acceptor until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            // Take the permit first: at the cap, the accept itself waits.
            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let (stream, addr) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                },
            };

            let server = self.clone();
            let conn_shutdown = shutdown.clone();
            tokio::spawn(async move {
                server.serve_connection(stream, addr, permit, conn_shutdown).await;
            });
        }
        info!("acceptor stopped");
    }

    async fn serve_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        permit: OwnedSemaphorePermit,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", addr, e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue_tx, queue_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
        let handle = ConnectionHandle::new(id, addr, queue_tx);

        self.bus.subscribe(handle.clone());
        self.stats.record_open();
        debug!("connection {} opened from {}", id, addr);

        let (read_half, write_half) = stream.into_split();
        let writer = tokio::spawn(write_loop(write_half, queue_rx));

        match self.read_loop(read_half, &handle, &mut shutdown).await {
            Ok(()) => debug!("connection {} closed", id),
            Err(e) => warn!("connection {} failed: {}", id, e),
        }

        // Unsubscribe before dropping our handle: once both senders are
        // gone the writer drains what is queued and exits.
        self.bus.unsubscribe(id);
        drop(handle);
        let _ = writer.await;
        self.stats.record_close();
        drop(permit);
    }

    async fn read_loop(
        &self,
        mut read_half: OwnedReadHalf,
        handle: &ConnectionHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), NetError> {
        let mut decoder = FrameDecoder::new(self.cfg.maximum_message_size);
        let idle_limit = Duration::from_secs(self.cfg.communication_timeout_secs);

        loop {
            while let Some(frame) = decoder.next()? {
                self.stats.record_frame_in();
                if let Some(reply) = self.dispatcher.dispatch(&frame.payload)? {
                    let encoded = encode_frame(frame.correlation_id, &reply);
                    if !handle.enqueue(encoded).await {
                        return Err(NetError::ConnectionLost);
                    }
                    self.stats.record_frame_out();
                }
            }

            decoder.read_buf().reserve(self.cfg.message_buffer_size);
            let read = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                read = tokio::time::timeout(idle_limit, read_half.read_buf(decoder.read_buf())) => read,
            };
            match read {
                Err(_) => {
                    return Err(NetError::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "communication timeout",
                    )));
                }
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Drain the outbound queue onto the socket. One queue item is one whole
/// frame, so a reply and a broadcast can never interleave bytes.
async fn write_loop(mut write_half: OwnedWriteHalf, mut queue: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            debug!("write failed: {}", e);
            break;
        }
    }
}
