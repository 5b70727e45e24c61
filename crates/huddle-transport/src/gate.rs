//! Types the upgrade gate works with.
//!
//! The gate is a plain closure run while the WebSocket handshake is in
//! flight. It sees an [`UpgradeRequest`] (path, query, headers, peer) and
//! either admits the connection, optionally adding response headers, or
//! rejects it with an HTTP status. Rejected peers never get a WebSocket.

use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};
use tokio_tungstenite::tungstenite::http::StatusCode;

/// The parts of an HTTP upgrade request the gate may look at.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    peer: SocketAddr,
    path: String,
    query: Vec<(String, String)>,
    /// Header names are stored lowercased. Non-UTF-8 values are dropped.
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    pub fn new(peer: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            peer,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Builds the request view from the handshake's HTTP request.
    pub(crate) fn from_http(peer: SocketAddr, request: &Request) -> Self {
        let uri = request.uri();
        let query = uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_ascii_lowercase(), value.to_owned()))
            })
            .collect();

        Self {
            peer,
            path: uri.path().to_owned(),
            query,
            headers,
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_owned()));
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First value of a header. Lookup is case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A successful gate decision.
#[derive(Debug)]
pub struct Admission<T> {
    /// Handed back to the caller of `upgrade` together with the connection.
    pub value: T,
    /// Extra headers for the `101 Switching Protocols` response.
    pub headers: Vec<(String, String)>,
}

impl<T> Admission<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A refused upgrade: the peer receives an HTTP response with this status
/// and the reason as its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub reason: String,
}

impl Rejection {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, reason)
    }

    pub fn unauthorized() -> Self {
        Self::new(401, "unauthorized")
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(404, reason)
    }

    pub fn too_many_requests() -> Self {
        Self::new(429, "rate limit exceeded")
    }

    pub(crate) fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST);
        response
    }
}
