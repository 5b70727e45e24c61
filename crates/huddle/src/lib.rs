//! # Huddle
//!
//! Real-time planning-poker rooms over WebSockets.
//!
//! A host creates a room and gets a short code; participants join with the
//! code and a display name. Everyone in a room sees the others come and go,
//! participants vote, and the votes are revealed together once every
//! participant has voted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use huddle::prelude::*;
//!
//! # async fn serve() -> Result<(), HuddleError> {
//! let server = HuddleServer::builder()
//!     .config(ServerConfig::from_env()?)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! Clients connect to `/ws?mode=create` (host) or
//! `/ws?mode=join&code=<CODE>&name=<NAME>` with the shared secret in the
//! `X-Client-Secret` header. The same listener answers `GET /health` and
//! `POST /create`, which returns a fresh room code as the response body.

pub mod config;
mod error;
mod handler;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::HuddleError;
pub use handler::{CREATE_PATH, HEALTH_PATH, ROOM_CODE_HEADER, SECRET_HEADER, WS_PATH};
pub use server::{HuddleServer, HuddleServerBuilder};

/// Re-exports the types most servers need.
pub mod prelude {
    pub use crate::{HuddleError, HuddleServer, HuddleServerBuilder, ServerConfig};
    pub use huddle_protocol::{ClientId, Envelope, MessageType, Reason, RoomCode};
    pub use huddle_room::{RoomConfig, RoomRegistry};
    pub use huddle_session::{Authenticator, PerAddressRateLimiter, RateLimiter, SharedSecret};
}
