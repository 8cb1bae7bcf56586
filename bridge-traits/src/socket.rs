//! Push Transport Abstraction
//!
//! The push transport is a persistent bidirectional socket delivering the
//! live radio feed: binary frames carrying audio payload or short control
//! markers, and text frames carrying metadata JSON. Outbound traffic is
//! limited to small JSON control messages (now-playing requests, pings).
//!
//! Implementations own framing and TLS; the core only sees [`SocketFrame`]s.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One inbound frame from the push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    /// Binary payload: audio bytes or a 2-byte control marker. May be empty
    /// (a zero-length flush frame).
    Binary(Bytes),
    /// Text payload: metadata JSON.
    Text(String),
    /// The transport closed. Delivered exactly once; no further frames
    /// follow. `reason` is the close message when the peer supplied one.
    Closed { reason: Option<String> },
}

impl SocketFrame {
    /// Returns `true` for the terminal close frame.
    pub fn is_closed(&self) -> bool {
        matches!(self, SocketFrame::Closed { .. })
    }
}

/// An open push-transport connection.
///
/// `recv` and `send_text` take `&self` so a connection can be shared between
/// the receive loop and the liveness-probe path; implementations serialize
/// access internally.
#[async_trait]
pub trait StreamSocket: Send + Sync {
    /// Receive the next inbound frame.
    ///
    /// Resolves to [`SocketFrame::Closed`] when the transport closes; after
    /// that every subsequent call returns `Closed` again rather than
    /// blocking forever.
    async fn recv(&self) -> Result<SocketFrame>;

    /// Send a text control message.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TransportClosed`](crate::error::BridgeError)
    /// when the connection is no longer writable.
    async fn send_text(&self, payload: &str) -> Result<()>;

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// Factory for push-transport connections.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a new connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamSocket>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_frame_detection() {
        assert!(SocketFrame::Closed { reason: None }.is_closed());
        assert!(!SocketFrame::Binary(Bytes::from_static(&[1, 2])).is_closed());
        assert!(!SocketFrame::Text("{}".into()).is_closed());
    }
}
