//! Client sessions for Huddle.
//!
//! This crate handles everything between an accepted connection and a room:
//!
//! 1. **Authentication**: checking the shared secret ([`Authenticator`])
//! 2. **Rate limiting**: one admission per address per window ([`RateLimiter`])
//! 3. **Sessions**: joining the room and pumping frames both ways
//!    ([`ClientSession`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)  ← admits connections, establishes sessions
//!     ↕
//! Session Layer (this crate)  ← reader/writer pumps per client
//!     ↕
//! Room Layer / Transport (below)  ← room actors, split connections
//! ```

mod auth;
mod error;
mod rate_limit;
mod session;

pub use auth::{Authenticator, SharedSecret};
pub use error::SessionError;
pub use rate_limit::{PerAddressRateLimiter, RateLimiter, client_key};
pub use session::{ClientSession, JoinRequest};
