//! Wire constants shared by the server, the codec, and the client.

// =============================================================================
// FRAME LAYOUT
// =============================================================================
// A frame is: [length: u32 le][correlation id: i32 le][payload]
// where `length` counts the whole frame, its own four bytes included.
// The payload begins with a one-byte message-type code (see command.rs).

/// Size of the length field.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the frame header: length field plus correlation id.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Smallest frame that can carry a payload. A declared length at or below
/// this is impossible and the connection is torn down.
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE;

/// Correlation id reserved for server-initiated broadcast frames.
/// Clients never allocate id 0 for a request, so an inbound frame bearing
/// it is unambiguously a broadcast.
pub const BROADCAST_CORRELATION_ID: i32 = 0;

// =============================================================================
// LIMITS AND DEFAULTS
// =============================================================================

/// Default cap on a decoded frame payload (2 MB).
/// The configured `maximum_message_size` overrides this; the decoder
/// rejects any frame whose declared length exceeds the cap plus header.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Per-connection outbound queue depth, in frames.
/// Replies block the reader when the queue is full (backpressure on the
/// request path); broadcasts are dropped for that connection instead.
pub const WRITE_QUEUE_DEPTH: usize = 256;

/// Literal command prefix of an expiration broadcast payload.
pub const EXPIRE_BROADCAST_PREFIX: &str = "expire ";
