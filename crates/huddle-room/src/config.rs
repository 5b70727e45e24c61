//! Room configuration and the voting round state machine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every room a [`RoomRegistry`](crate::RoomRegistry)
/// creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Capacity of a room actor's command queue. Senders wait when it's full.
    pub command_capacity: usize,

    /// Capacity of each member's outbound queue. A member whose queue fills
    /// up is evicted from the room.
    pub outbound_capacity: usize,

    /// Number of characters in a generated room code.
    pub code_length: usize,

    /// How many random codes to try before giving up on finding an unused one.
    pub max_code_attempts: usize,

    /// How many codes of retired rooms are held back from reissue, oldest
    /// released first. Zero makes a code reusable as soon as its room is gone.
    pub retired_code_memory: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            outbound_capacity: 64,
            code_length: 4,
            max_code_attempts: 64,
            retired_code_memory: 1024,
        }
    }
}

impl RoomConfig {
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_code_length(mut self, length: usize) -> Self {
        self.code_length = length;
        self
    }

    pub fn with_retired_code_memory(mut self, codes: usize) -> Self {
        self.retired_code_memory = codes;
        self
    }
}

// ---------------------------------------------------------------------------
// RoundState
// ---------------------------------------------------------------------------

/// Where the room's current voting round stands.
///
/// ```text
///          start            all votes in
/// Idle ──────────▶ Voting ──────────────▶ Revealed
///  ▲                 │ ▲                     │
///  │      reset      │ └────── start ────────┤
///  └─────────────────┴───────── reset ───────┘
/// ```
///
/// Only the host moves the round with `start` and `reset`; `Revealed` is
/// entered by the room itself whenever an accepted vote completes the
/// ledger. Votes are accepted in every state, so a vote cast while `Idle`
/// can reveal, and a latecomer's vote after a reveal reveals again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    #[default]
    Idle,
    Voting,
    Revealed,
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Voting => write!(f, "Voting"),
            Self::Revealed => write!(f, "Revealed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_state_default_is_idle() {
        assert_eq!(RoundState::default(), RoundState::Idle);
    }

    #[test]
    fn test_round_state_display() {
        assert_eq!(RoundState::Idle.to_string(), "Idle");
        assert_eq!(RoundState::Revealed.to_string(), "Revealed");
    }

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.command_capacity, 64);
        assert_eq!(config.outbound_capacity, 64);
        assert_eq!(config.code_length, 4);
        assert_eq!(config.max_code_attempts, 64);
        assert_eq!(config.retired_code_memory, 1024);
    }

    #[test]
    fn test_room_config_setters() {
        let config = RoomConfig::default()
            .with_outbound_capacity(2)
            .with_code_length(6);
        assert_eq!(config.outbound_capacity, 2);
        assert_eq!(config.code_length, 6);
    }
}
