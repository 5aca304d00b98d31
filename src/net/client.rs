//! Multiplexed cache client
//!
//! Many callers share one socket: each request carries a correlation id,
//! a reader task routes the matching reply back to its waiter, and frames
//! bearing the reserved broadcast id surface on a separate event channel.
//! Connection loss releases every waiter with a transport outcome.

use super::broadcast::BroadcastEvent;
use super::error::NetError;
use super::frame::{encode_frame, FrameDecoder};
use super::wire::{BROADCAST_CORRELATION_ID, DEFAULT_MAX_MESSAGE_SIZE};
use crate::command::{MessageType, ABSOLUTE_TIMESTAMP_FORMAT};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Depth of the broadcast-event channel handed to the caller.
const EVENT_CHANNEL_DEPTH: usize = 64;

/// Options for a `set`, mirroring the wire flags.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Never expires, never evicted; supersedes the other options.
    pub interned: bool,
    /// Tag to group the keys under.
    pub tag: Option<String>,
    /// Absolute expiration instant; wins over `sliding`.
    pub absolute: Option<DateTime<Utc>>,
    /// Sliding window, whole seconds.
    pub sliding: Option<Duration>,
    /// Announce removal to all connected clients.
    pub notify: bool,
}

/// Waiters keyed by correlation id. `None` once the connection is lost,
/// so later requests fail fast instead of queuing forever.
type PendingMap = Mutex<Option<HashMap<i32, oneshot::Sender<Vec<u8>>>>>;

struct ClientInner {
    pending: PendingMap,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    next_id: AtomicI32,
}

/// Handle to one cache host. Clone freely; all clones share the socket.
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<ClientInner>,
}

impl CacheClient {
    /// Connect and start the reply router. The returned receiver yields
    /// the host's expiration broadcasts.
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> Result<(Self, mpsc::Receiver<BroadcastEvent>), NetError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let inner = Arc::new(ClientInner {
            pending: Mutex::new(Some(HashMap::new())),
            writer: tokio::sync::Mutex::new(write_half),
            // Ids only need to be unique within this connection, and
            // never 0: that value is reserved for broadcasts.
            next_id: AtomicI32::new(rand::random()),
        });

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        tokio::spawn(read_loop(read_half, inner.clone(), event_tx));

        Ok((Self { inner }, event_rx))
    }

    fn allocate_id(&self) -> i32 {
        loop {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            if id != BROADCAST_CORRELATION_ID {
                return id;
            }
        }
    }

    /// Send one request payload and await the frame echoing its id.
    pub async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, NetError> {
        let id = self.allocate_id();
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().unwrap();
            let Some(map) = pending.as_mut() else {
                return Err(NetError::ConnectionLost);
            };
            map.insert(id, reply_tx);
        }

        if let Err(e) = self.write_frame(id, payload).await {
            if let Some(map) = self.inner.pending.lock().unwrap().as_mut() {
                map.remove(&id);
            }
            return Err(e);
        }

        reply_rx.await.map_err(|_| NetError::ConnectionLost)
    }

    /// Send a request that gets no reply (`del`, `clear`).
    pub async fn send_only(&self, payload: &[u8]) -> Result<(), NetError> {
        let id = self.allocate_id();
        self.write_frame(id, payload).await
    }

    async fn write_frame(&self, id: i32, payload: &[u8]) -> Result<(), NetError> {
        let frame = encode_frame(id, payload);
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(())
    }

    /// Fetch values for `keys`; misses are omitted from the result.
    pub async fn get(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>, NetError> {
        let payload = command(MessageType::RepeatingKeys, &["get"], keys);
        parse_values(&self.request(&payload).await?)
    }

    /// Fetch values of tagged keys matching `pattern`.
    pub async fn get_tagged(&self, pattern: &str, tags: &[&str]) -> Result<Vec<Vec<u8>>, NetError> {
        let mut operands = vec!["get", pattern, "-t"];
        operands.extend_from_slice(tags);
        let payload = command(MessageType::RepeatingKeys, &operands, &[]);
        parse_values(&self.request(&payload).await?)
    }

    /// Store key/value pairs under one policy. Resolves once the host has
    /// applied the batch.
    pub async fn set(&self, entries: &[(&str, &[u8])], opts: &SetOptions) -> Result<(), NetError> {
        let mut tokens: Vec<String> = vec!["set".into()];
        if opts.interned {
            tokens.push("-i".into());
        }
        if let Some(tag) = &opts.tag {
            tokens.push("-t".into());
            tokens.push(tag.clone());
        }
        if let Some(at) = &opts.absolute {
            tokens.push("-a".into());
            tokens.push(at.format(ABSOLUTE_TIMESTAMP_FORMAT).to_string());
        }
        if let Some(window) = &opts.sliding {
            tokens.push("-s".into());
            tokens.push(window.as_secs().to_string());
        }
        if opts.notify {
            tokens.push("-c".into());
        }
        for (key, value) in entries {
            tokens.push((*key).to_string());
            tokens.push(BASE64.encode(value));
        }

        let joined: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let payload = command(MessageType::RepeatingKeyValues, &joined, &[]);
        self.request(&payload).await?;
        Ok(())
    }

    /// Remove keys, fire-and-forget.
    pub async fn del(&self, keys: &[&str]) -> Result<(), NetError> {
        let payload = command(MessageType::RepeatingKeys, &["del"], keys);
        self.send_only(&payload).await
    }

    /// Remove tagged keys matching `pattern`, fire-and-forget.
    pub async fn del_tagged(&self, pattern: &str, tags: &[&str]) -> Result<(), NetError> {
        let mut operands = vec!["del", pattern, "-t"];
        operands.extend_from_slice(tags);
        let payload = command(MessageType::RepeatingKeys, &operands, &[]);
        self.send_only(&payload).await
    }

    /// Enumerate key names matching `pattern`.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, NetError> {
        let payload = command(MessageType::RepeatingKeys, &["keys", pattern], &[]);
        parse_keys(&self.request(&payload).await?)
    }

    /// Enumerate tagged key names matching `pattern`.
    pub async fn keys_tagged(&self, pattern: &str, tags: &[&str]) -> Result<Vec<String>, NetError> {
        let mut operands = vec!["keys", pattern, "-t"];
        operands.extend_from_slice(tags);
        let payload = command(MessageType::RepeatingKeys, &operands, &[]);
        parse_keys(&self.request(&payload).await?)
    }

    /// Drop every non-interned entry, fire-and-forget.
    pub async fn clear(&self) -> Result<(), NetError> {
        let payload = command(MessageType::Literal, &["clear"], &[]);
        self.send_only(&payload).await
    }

    /// Half-close the socket so the host tears the session down. The
    /// reader task winds up on the server's close.
    pub async fn close(&self) {
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Route inbound frames to waiters or the event channel until the socket
/// dies, then release everything still pending.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    inner: Arc<ClientInner>,
    events: mpsc::Sender<BroadcastEvent>,
) {
    let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);

    'conn: loop {
        loop {
            match decoder.next() {
                Ok(Some(frame)) => {
                    if frame.correlation_id == BROADCAST_CORRELATION_ID {
                        if let Some(event) = BroadcastEvent::parse_payload(&frame.payload) {
                            // Best-effort, like the server side: a caller
                            // not draining events does not stall replies.
                            let _ = events.try_send(event);
                        }
                        continue;
                    }
                    let waiter = inner
                        .pending
                        .lock()
                        .unwrap()
                        .as_mut()
                        .and_then(|map| map.remove(&frame.correlation_id));
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(frame.payload.to_vec());
                        }
                        None => debug!("reply for unknown correlation id {}", frame.correlation_id),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("client decoder error: {}", e);
                    break 'conn;
                }
            }
        }

        match read_half.read_buf(decoder.read_buf()).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("client read failed: {}", e);
                break;
            }
        }
    }

    // Dropping the waiters wakes every caller with a transport outcome.
    inner.pending.lock().unwrap().take();
}

/// Build a request payload: type code, verb tokens, then trailing tokens.
fn command(kind: MessageType, head: &[&str], tail: &[&str]) -> Vec<u8> {
    let mut out = vec![kind.code()];
    for (i, token) in head.iter().chain(tail.iter()).enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(token.as_bytes());
    }
    out
}

fn body_tokens(payload: &[u8]) -> Result<Vec<&str>, NetError> {
    let Some((_, body)) = payload.split_first() else {
        return Err(NetError::protocol("empty reply payload"));
    };
    let text =
        std::str::from_utf8(body).map_err(|_| NetError::protocol("reply is not valid UTF-8"))?;
    Ok(text.split(' ').filter(|t| !t.is_empty()).collect())
}

fn parse_values(payload: &[u8]) -> Result<Vec<Vec<u8>>, NetError> {
    body_tokens(payload)?
        .into_iter()
        .map(|token| {
            BASE64
                .decode(token)
                .map_err(|_| NetError::protocol("reply value is not valid base-64"))
        })
        .collect()
}

fn parse_keys(payload: &[u8]) -> Result<Vec<String>, NetError> {
    Ok(body_tokens(payload)?.into_iter().map(str::to_string).collect())
}
