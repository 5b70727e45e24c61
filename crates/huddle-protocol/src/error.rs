//! Error types for the protocol layer.
//!
//! Each Huddle crate defines its own error enum. A `ProtocolError` always
//! means a frame or payload could not be turned into (or out of) the JSON
//! shape the wire expects; it never says anything about rooms or sockets.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing an envelope into a frame failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not a valid envelope: malformed JSON, a missing
    /// `type` field, or a field of the wrong JSON type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope decoded, but its payload doesn't have the shape its
    /// type promises (e.g. a `vote` without a `value`).
    #[error("invalid payload for `{kind}`: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
