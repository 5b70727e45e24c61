/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting TCP connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket handshake itself failed (bad request, peer vanished).
    #[error("handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// The upgrade gate refused the request; the peer got an HTTP error
    /// response with this status instead of a WebSocket.
    #[error("upgrade rejected with {status}: {reason}")]
    Rejected { status: u16, reason: String },
}
