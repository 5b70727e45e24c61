//! Unified error type for the Huddle server.

use huddle_session::SessionError;
use huddle_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps every crate-specific error.
///
/// `?` converts sub-crate errors through the generated `From` impls.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    /// Binding, accepting, or the upgrade handshake.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Admission or a refused join.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
