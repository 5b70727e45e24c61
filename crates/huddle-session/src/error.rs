//! Error types for the session layer.

use huddle_room::RoomError;

/// Errors that can occur while admitting or establishing a client session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client didn't present the shared secret.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The room refused the join after the upgrade; the connection was
    /// closed with the refusal reason.
    #[error("join refused: {0}")]
    JoinRefused(#[source] RoomError),
}
