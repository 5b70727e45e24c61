//! Rooms for Huddle.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! membership, vote ledger and round state.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: creates rooms, looks them up by code, sweeps idle ones
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`Member`]: a client joining a room, with its outbound queue
//! - [`RoundState`]: the voting round state machine
//! - [`RoomConfig`]: queue capacities and code generation settings

mod code;
mod config;
mod error;
mod manager;
mod room;

pub use config::{RoomConfig, RoundState};
pub use error::RoomError;
pub use manager::RoomRegistry;
pub use room::{
    Member, MemberReceiver, MemberSender, RoomActivity, RoomHandle, RoomInfo, outbound_channel,
};
