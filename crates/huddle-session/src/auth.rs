//! Authentication hook for validating clients during the upgrade.
//!
//! Huddle clients prove they're allowed in by presenting a shared secret
//! in the `X-Client-Secret` header. The check runs inside the WebSocket
//! handshake, so [`Authenticator`] is synchronous.

use ring::hmac;

use crate::SessionError;

/// Validates the credential a client presented.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// connection task for the lifetime of the server.
pub trait Authenticator: Send + Sync + 'static {
    /// Checks the credential, `None` meaning the client presented none.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`] if the credential is missing or wrong.
    fn authenticate(&self, credential: Option<&str>) -> Result<(), SessionError>;
}

/// Accepts exactly one shared secret.
///
/// The comparison runs in constant time: the presented value is MACed with
/// a per-process random key and checked against the MAC of the expected
/// secret, so neither the content nor the length of the secret leaks
/// through timing.
pub struct SharedSecret {
    key: hmac::Key,
    expected: hmac::Tag,
}

impl SharedSecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &rand::random::<[u8; 32]>());
        let expected = hmac::sign(&key, secret.as_ref());
        Self { key, expected }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

impl Authenticator for SharedSecret {
    fn authenticate(&self, credential: Option<&str>) -> Result<(), SessionError> {
        let presented = credential.unwrap_or_default();
        hmac::verify(&self.key, presented.as_bytes(), self.expected.as_ref())
            .map_err(|_| SessionError::AuthFailed("invalid client secret".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_accepts_matching_secret() {
        let auth = SharedSecret::new("planning-poker");
        assert!(auth.authenticate(Some("planning-poker")).is_ok());
    }

    #[test]
    fn test_shared_secret_rejects_wrong_secret() {
        let auth = SharedSecret::new("planning-poker");
        let err = auth.authenticate(Some("planning-pokeR")).unwrap_err();
        assert!(matches!(err, SessionError::AuthFailed(_)));
    }

    #[test]
    fn test_shared_secret_rejects_prefix_and_missing() {
        let auth = SharedSecret::new("planning-poker");
        assert!(auth.authenticate(Some("planning")).is_err());
        assert!(auth.authenticate(Some("")).is_err());
        assert!(auth.authenticate(None).is_err());
    }

    #[test]
    fn test_shared_secret_debug_hides_secret() {
        let auth = SharedSecret::new("hunter2");
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
