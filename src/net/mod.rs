//! Framed TCP layer: codec, server, broadcast fanout, client

pub mod broadcast;
pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod server;
pub mod wire;

// Re-exports
pub use broadcast::{BroadcastBus, BroadcastEvent};
pub use client::{CacheClient, SetOptions};
pub use connection::{ConnectionHandle, ConnectionId, ServerStats};
pub use error::NetError;
pub use frame::{encode_frame, Frame, FrameDecoder};
pub use server::CacheServer;
pub use wire::{
    BROADCAST_CORRELATION_ID, DEFAULT_MAX_MESSAGE_SIZE, EXPIRE_BROADCAST_PREFIX,
    FRAME_HEADER_SIZE, WRITE_QUEUE_DEPTH,
};
