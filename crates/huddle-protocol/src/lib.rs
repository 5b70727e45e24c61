//! Wire protocol for Huddle.
//!
//! This crate defines what clients and rooms say to each other:
//!
//! - **Types** ([`Envelope`], [`MessageType`], payload shapes): the JSON
//!   messages that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes become
//!   frame bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (Envelope) → Session → Room actor
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ClientId, Envelope, MessageType, Reason, ReasonPayload, RoomCode,
    VotePayload, VoteProgress,
};
