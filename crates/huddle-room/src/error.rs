//! Error types for the room layer.

use huddle_protocol::{ClientId, RoomCode};

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room is registered under this code.
    #[error("room {0} not found")]
    NotFound(RoomCode),

    /// A host tried to join a room that already has one.
    #[error("room {0} already has a host")]
    HostTaken(RoomCode),

    /// A participant with this display name is already in the room.
    #[error("name {name:?} is already taken in room {code}")]
    NameTaken { code: RoomCode, name: String },

    /// The client is already a member of this room.
    #[error("client {0} already in room {1}")]
    AlreadyJoined(ClientId, RoomCode),

    /// The room's actor has stopped: it was retired when its last member
    /// left, or shut down by the idle sweep.
    #[error("room {0} is unavailable")]
    Unavailable(RoomCode),

    /// Every generated code was already taken.
    #[error("no free room code after {0} attempts")]
    CodesExhausted(usize),
}

impl RoomError {
    /// Short machine-readable reason, used as the WebSocket close reason
    /// when a join is refused after the upgrade.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::Unavailable(_) => "room_not_found",
            Self::HostTaken(_) => "host_taken",
            Self::NameTaken { .. } => "name_taken",
            Self::AlreadyJoined(..) => "already_joined",
            Self::CodesExhausted(_) => "codes_exhausted",
        }
    }
}
