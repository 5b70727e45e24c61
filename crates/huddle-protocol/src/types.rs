//! Core protocol types for Huddle's wire format.
//!
//! Every frame on the wire, in both directions, is one [`Envelope`]:
//!
//! ```text
//! {"type": "vote", "sender": "Alice", "payload": {"value": "5"}}
//! ```
//!
//! - `type` is the message tag. Known tags map to [`MessageType`]
//!   variants; anything else is kept verbatim in [`MessageType::Other`]
//!   so rooms can forward message kinds they don't understand.
//! - `sender` is stamped by the server on receipt. Whatever a client puts
//!   there is overwritten before the room ever sees it.
//! - `payload` is opaque JSON. Only the handler for a given type reads it,
//!   through [`Envelope::payload_as`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Server-assigned identity of one connected client.
///
/// Display names are chosen by users and may collide across rooms, so the
/// room actor keys its membership by this id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// The short code a room is known by (e.g. `AB12`).
///
/// Codes are case-insensitive for users, so construction normalizes to
/// ASCII uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The `type` tag of an envelope.
///
/// Serialized as a plain snake_case string. Unknown tags deserialize into
/// [`MessageType::Other`] instead of failing, and serialize back to the
/// exact same string, so forward-compatible clients can exchange message
/// kinds the server has never heard of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Client → room: cast a vote. Payload `{"value": ...}`.
    Vote,
    /// Room → voter: the vote was recorded.
    VoteConfirmed,
    /// Room → voter: the vote was refused. Payload `{"reason": ...}`.
    VoteRejected,
    /// Room → all: `{"current": n, "total": m}` after every accepted vote.
    VoteProgress,
    /// Host → room → all: a new round begins.
    Start,
    /// Host → room → all: the round is discarded.
    Reset,
    /// Room → all: the full ledger, `{"<name>": "<value>", ...}`.
    Reveal,
    /// Room → all: `{"name": ...}` when a participant arrives.
    ParticipantJoin,
    /// Room → all: `{"name": ...}` when a participant goes.
    ParticipantLeave,
    /// Room → joiner: `["name", ...]` of the participants already present.
    ParticipantList,
    /// Room → sender: a host-only action was refused. `{"reason": ...}`.
    Error,
    /// Any tag not listed above, forwarded untouched.
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Vote => "vote",
            Self::VoteConfirmed => "vote_confirmed",
            Self::VoteRejected => "vote_rejected",
            Self::VoteProgress => "vote_progress",
            Self::Start => "start",
            Self::Reset => "reset",
            Self::Reveal => "reveal",
            Self::ParticipantJoin => "participant_join",
            Self::ParticipantLeave => "participant_leave",
            Self::ParticipantList => "participant_list",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "vote" => Self::Vote,
            "vote_confirmed" => Self::VoteConfirmed,
            "vote_rejected" => Self::VoteRejected,
            "vote_progress" => Self::VoteProgress,
            "start" => Self::Start,
            "reset" => Self::Reset,
            "reveal" => Self::Reveal,
            "participant_join" => Self::ParticipantJoin,
            "participant_leave" => Self::ParticipantLeave,
            "participant_list" => Self::ParticipantList,
            "error" => Self::Error,
            _ => Self::Other(tag),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reasons
// ---------------------------------------------------------------------------

/// Why a request was refused. Carried in `vote_rejected` and `error`
/// payloads as a snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    HostCannotVote,
    AlreadyVoted,
    InvalidVote,
    OnlyHostCanStart,
    OnlyHostCanReset,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostCannotVote => "host_cannot_vote",
            Self::AlreadyVoted => "already_voted",
            Self::InvalidVote => "invalid_vote",
            Self::OnlyHostCanStart => "only_host_can_start",
            Self::OnlyHostCanReset => "only_host_can_reset",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

/// Payload of a client's `vote`.
///
/// Clients send the value as a string (`"5"`, `"?"`, `"☕"`), but plain
/// JSON numbers are accepted too and kept in their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VotePayload {
    #[serde(alias = "Value", deserialize_with = "vote_value")]
    pub value: String,
}

fn vote_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Payload of `vote_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteProgress {
    pub current: usize,
    pub total: usize,
}

/// Payload of `vote_rejected` / `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonPayload {
    pub reason: Reason,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit exchanged between clients and rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// An envelope with no sender and no payload.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            sender: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Replaces the sender. Sessions call this on every inbound frame.
    pub fn stamped(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Interprets the payload as `T`. A missing payload is read as JSON
    /// `null`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Payload`] if the payload doesn't match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|source| ProtocolError::Payload {
            kind: self.kind.to_string(),
            source,
        })
    }

    // -- Server-originated messages --

    pub fn vote_confirmed() -> Self {
        Self::new(MessageType::VoteConfirmed)
    }

    pub fn vote_rejected(reason: Reason) -> Self {
        Self::new(MessageType::VoteRejected).with_payload(json!({ "reason": reason.as_str() }))
    }

    pub fn vote_progress(current: usize, total: usize) -> Self {
        Self::new(MessageType::VoteProgress)
            .with_payload(json!({ "current": current, "total": total }))
    }

    pub fn start() -> Self {
        Self::new(MessageType::Start)
    }

    pub fn reset() -> Self {
        Self::new(MessageType::Reset)
    }

    pub fn reveal(ledger: &BTreeMap<String, String>) -> Self {
        let votes = ledger
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        Self::new(MessageType::Reveal).with_payload(Value::Object(votes))
    }

    pub fn participant_join(name: &str) -> Self {
        Self::new(MessageType::ParticipantJoin).with_payload(json!({ "name": name }))
    }

    pub fn participant_leave(name: &str) -> Self {
        Self::new(MessageType::ParticipantLeave).with_payload(json!({ "name": name }))
    }

    pub fn participant_list(names: &[String]) -> Self {
        let names = names.iter().cloned().map(Value::String).collect();
        Self::new(MessageType::ParticipantList).with_payload(Value::Array(names))
    }

    pub fn error(reason: Reason) -> Self {
        Self::new(MessageType::Error).with_payload(json!({ "reason": reason.as_str() }))
    }
}

// =========================================================================
// Tests
// =========================================================================
