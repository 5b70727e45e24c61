//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::http::{HEAD_TIMEOUT, Incoming, Rewind, classify};
use crate::{
    Admission, CloseNotice, Connection, ConnectionId, FrameReader, FrameWriter, Rejection,
    Transport, TransportError, UpgradeRequest,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<Rewind<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// The address actually bound (useful after binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingUpgrade;

    async fn accept(&mut self) -> Result<PendingUpgrade, TransportError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(%peer, "accepted TCP connection");
        Ok(PendingUpgrade {
            stream,
            peer,
            head: Vec::new(),
        })
    }
}

/// A TCP connection waiting for its WebSocket handshake.
pub struct PendingUpgrade {
    stream: TcpStream,
    peer: SocketAddr,
    /// Bytes already read off `stream` by [`route`](Self::route), replayed
    /// to the handshake.
    head: Vec<u8>,
}

impl PendingUpgrade {
    pub(crate) fn replaying(stream: TcpStream, peer: SocketAddr, head: Vec<u8>) -> Self {
        Self { stream, peer, head }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the HTTP request head and tells WebSocket upgrades apart from
    /// plain requests.
    ///
    /// Calling [`upgrade`](Self::upgrade) without routing first is fine for
    /// listeners that only expect upgrades.
    ///
    /// # Errors
    /// [`TransportError::Handshake`] if the head is malformed, too large, or
    /// doesn't arrive within ten seconds.
    pub async fn route(self) -> Result<Incoming, TransportError> {
        if !self.head.is_empty() {
            return Ok(Incoming::Upgrade(self));
        }
        let peer = self.peer;
        tokio::time::timeout(HEAD_TIMEOUT, classify(self.stream, peer))
            .await
            .map_err(|_| {
                TransportError::Handshake(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "request head timed out",
                ))
            })?
    }

    /// Runs the WebSocket handshake, asking `gate` whether to admit the
    /// request.
    ///
    /// The gate runs synchronously inside the handshake, after the HTTP
    /// request has been read and before the `101` response is written. On
    /// rejection the peer receives the rejection's HTTP status and this
    /// returns [`TransportError::Rejected`].
    pub async fn upgrade<T, F>(self, gate: F) -> Result<(WebSocketConnection, T), TransportError>
    where
        F: FnOnce(&UpgradeRequest) -> Result<Admission<T>, Rejection> + Unpin,
    {
        let peer = self.peer;
        let mut admitted: Option<T> = None;
        let mut rejected: Option<Rejection> = None;

        let callback =
            |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                let view = UpgradeRequest::from_http(peer, request);
                match gate(&view) {
                    Ok(admission) => {
                        for (name, value) in admission.headers {
                            match (
                                HeaderName::from_bytes(name.as_bytes()),
                                HeaderValue::from_str(&value),
                            ) {
                                (Ok(name), Ok(value)) => {
                                    response.headers_mut().insert(name, value);
                                }
                                _ => tracing::warn!(%name, "dropping invalid response header"),
                            }
                        }
                        admitted = Some(admission.value);
                        Ok(response)
                    }
                    Err(rejection) => {
                        rejected = Some(rejection.clone());
                        Err(rejection.into_response())
                    }
                }
            };

        let stream = Rewind::with_prefix(self.stream, self.head);
        let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;

        match (handshake, admitted, rejected) {
            (Ok(ws), Some(value), _) => {
                let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
                tracing::debug!(%id, %peer, "WebSocket upgrade complete");
                Ok((WebSocketConnection { id, peer, ws }, value))
            }
            (_, _, Some(rejection)) => Err(TransportError::Rejected {
                status: rejection.status,
                reason: rejection.reason,
            }),
            (Err(e), _, None) => Err(TransportError::Handshake(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                e,
            ))),
            (Ok(_), None, None) => Err(TransportError::Handshake(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "handshake completed without an admission decision",
            ))),
        }
    }
}

/// A single upgraded WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    ws: WsStream,
}

impl WebSocketConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for WebSocketConnection {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.ws.split();
        (
            WebSocketReader { id: self.id, stream },
            WebSocketWriter { id: self.id, sink },
        )
    }
}

/// Receiving half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    id: ConnectionId,
    stream: SplitStream<WsStream>,
}

impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    tracing::debug!(id = %self.id, error = %e, "WebSocket read error");
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }
}

/// Sending half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    id: ConnectionId,
    sink: SplitSink<WsStream, Message>,
}

impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        // JSON frames go out as text; anything else stays binary.
        let msg = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        };
        self.sink.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    async fn close(&mut self, notice: Option<CloseNotice>) -> Result<(), TransportError> {
        let frame = notice.map(|notice| CloseFrame {
            code: CloseCode::from(notice.code),
            reason: notice.reason.into(),
        });
        match self.sink.send(Message::Close(frame)).await {
            Ok(()) => {
                tracing::debug!(id = %self.id, "WebSocket closed");
                Ok(())
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }
}
