//! Plain HTTP requests sharing the WebSocket listener.
//!
//! Every accepted connection starts as an HTTP/1.1 request. [`route`]
//! reads the request head and either hands the connection on to the
//! WebSocket handshake (replaying the bytes it consumed) or returns a
//! [`PlainRequest`] that is answered with a single text response.
//!
//! [`route`]: crate::PendingUpgrade::route

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::Request;
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::{PendingUpgrade, TransportError, UpgradeRequest};

/// Request heads larger than this are refused.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Plain request bodies larger than this are refused.
const MAX_BODY_BYTES: usize = 8 * 1024;

/// How long a client gets to send its request head.
pub(crate) const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// What an accepted connection turned out to be.
pub enum Incoming {
    /// A WebSocket upgrade request, ready for [`PendingUpgrade::upgrade`].
    Upgrade(PendingUpgrade),
    /// Any other HTTP request.
    Plain(PlainRequest),
}

/// A non-upgrade HTTP request and the connection to answer it on.
pub struct PlainRequest {
    method: String,
    request: UpgradeRequest,
    body: Vec<u8>,
    stream: TcpStream,
}

impl PlainRequest {
    /// The request method, uppercase as sent (`GET`, `POST`, ...).
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path, query, headers and peer of the request.
    pub fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Writes a `text/plain` response and closes the connection.
    pub async fn respond(mut self, status: u16, body: &str) -> Result<(), TransportError> {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("");
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\n\
             content-type: text/plain; charset=utf-8\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        );
        self.stream
            .write_all(response.as_bytes())
            .await
            .map_err(TransportError::SendFailed)?;
        self.stream
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }
}

/// Reads the request head from `stream` and classifies it.
pub(crate) async fn classify(
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<Incoming, TransportError> {
    let (mut buf, head_len) = read_head(&mut stream)
        .await
        .map_err(TransportError::Handshake)?;
    let http = parse_head(&buf[..head_len]).map_err(TransportError::Handshake)?;

    let is_upgrade = http
        .headers()
        .get("upgrade")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    if is_upgrade {
        return Ok(Incoming::Upgrade(PendingUpgrade::replaying(stream, peer, buf)));
    }

    let content_length = http
        .headers()
        .get("content-length")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(TransportError::Handshake(io::Error::new(
            io::ErrorKind::InvalidData,
            "request body too large",
        )));
    }
    let mut body = buf.split_off(head_len);
    if body.len() < content_length {
        let start = body.len();
        body.resize(content_length, 0);
        stream
            .read_exact(&mut body[start..])
            .await
            .map_err(TransportError::ReceiveFailed)?;
    }
    body.truncate(content_length);

    Ok(Incoming::Plain(PlainRequest {
        method: http.method().as_str().to_owned(),
        request: UpgradeRequest::from_http(peer, &http),
        body,
        stream,
    }))
}

/// Reads until the blank line ending the head. Returns everything read and
/// the length of the head within it.
async fn read_head(stream: &mut TcpStream) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
            return Ok((buf, end + 4));
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn parse_head(head: &[u8]) -> io::Result<Request> {
    let invalid = |reason: &str| io::Error::new(io::ErrorKind::InvalidData, reason.to_owned());

    let text = std::str::from_utf8(head).map_err(|_| invalid("request head is not UTF-8"))?;
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (request_line.next(), request_line.next()) else {
        return Err(invalid("malformed request line"));
    };

    let mut builder = Request::builder().method(method).uri(target);
    for line in lines.take_while(|line| !line.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(invalid("malformed header line"));
        };
        builder = builder.header(name.trim(), value.trim());
    }
    builder
        .body(())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// A stream that yields `prefix` before reading from `inner`.
///
/// Lets the WebSocket handshake re-read a request head that routing
/// already consumed.
pub(crate) struct Rewind<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> Rewind<S> {
    pub(crate) fn with_prefix(inner: S, prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = (this.prefix.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            if this.pos == this.prefix.len() {
                this.prefix = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head_reads_method_target_and_headers() {
        let head =
            b"POST /create?x=1 HTTP/1.1\r\nHost: localhost\r\nX-Client-Secret:  s3cret \r\n\r\n";
        let request = parse_head(head).unwrap();
        assert_eq!(request.method().as_str(), "POST");
        assert_eq!(request.uri().path(), "/create");
        assert_eq!(request.uri().query(), Some("x=1"));
        assert_eq!(request.headers()["x-client-secret"], "s3cret");
    }

    #[test]
    fn test_parse_head_rejects_malformed_request_line() {
        let err = parse_head(b"GARBAGE\r\n\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_parse_head_rejects_header_without_colon() {
        assert!(parse_head(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn test_rewind_replays_prefix_then_reads_inner() {
        let inner: &[u8] = b" world";
        let mut stream = Rewind::with_prefix(inner, b"hello".to_vec());
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }
}
