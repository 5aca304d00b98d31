//! Network error taxonomy

use thiserror::Error;

/// Errors surfaced by the framing layer, the server, and the client.
///
/// Protocol errors close the offending connection without a reply.
/// Transport errors close the connection and release its resources.
#[derive(Debug, Error)]
pub enum NetError {
    /// Malformed frame: impossible declared length or unknown message-type
    /// code. The connection is closed, no reply is sent.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Socket-level failure or EOF mid-frame.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer went away before a reply arrived (client side).
    #[error("connection lost before reply")]
    ConnectionLost,
}

impl NetError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        NetError::Protocol(msg.into())
    }
}
