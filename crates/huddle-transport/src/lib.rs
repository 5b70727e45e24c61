//! Transport layer for Huddle.
//!
//! Provides the [`Transport`], [`Connection`], [`FrameReader`] and
//! [`FrameWriter`] traits plus their WebSocket implementation.
//!
//! A connection is always used as two independent halves: one task owns
//! the [`FrameReader`], another owns the [`FrameWriter`]. Neither half
//! waits on the other, so a client that never sends anything can still be
//! written to, and a stalled write never blocks reads.
//!
//! Accepting is split in two steps as well. [`Transport::accept`] only
//! takes the TCP connection; the WebSocket handshake runs later in the
//! connection's own task through [`PendingUpgrade::upgrade`], which lets
//! an admission gate inspect the HTTP request and refuse it before any
//! WebSocket exists. Listeners that also serve plain HTTP call
//! [`PendingUpgrade::route`] first, which reads the request head and hands
//! back either the pending upgrade or a [`PlainRequest`].

mod error;
mod gate;
mod http;
mod websocket;

pub use error::TransportError;
pub use gate::{Admission, Rejection, UpgradeRequest};
pub use http::{Incoming, PlainRequest};
pub use websocket::{
    PendingUpgrade, WebSocketConnection, WebSocketReader, WebSocketTransport, WebSocketWriter,
};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why the server is closing a connection, sent to the peer in the close
/// frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    /// WebSocket close code (1008 = policy violation, 1000 = normal).
    pub code: u16,
    pub reason: String,
}

impl CloseNotice {
    /// A 1008 policy-violation close, used when a room refuses a join.
    pub fn policy(reason: impl Into<String>) -> Self {
        Self {
            code: 1008,
            reason: reason.into(),
        }
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + 'static {
    /// An accepted connection that hasn't completed its handshake yet.
    type Pending: Send + 'static;

    /// Waits for and accepts the next incoming connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Pending, TransportError>> + Send;
}

/// An established, bidirectional connection.
pub trait Connection: Send + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Splits the connection into its receiving and sending halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// The receiving half of a connection.
pub trait FrameReader: Send + 'static {
    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;
}

/// The sending half of a connection.
pub trait FrameWriter: Send + 'static {
    /// Sends one frame.
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection, optionally telling the peer why. Closing an
    /// already-closed connection is not an error.
    fn close(
        &mut self,
        notice: Option<CloseNotice>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_close_notice_policy_uses_1008() {
        let notice = CloseNotice::policy("name_taken");
        assert_eq!(notice.code, 1008);
        assert_eq!(notice.reason, "name_taken");
    }
}
