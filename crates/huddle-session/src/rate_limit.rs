//! Per-address admission rate limiting.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use huddle_transport::UpgradeRequest;
use tokio::time::Instant;

/// Decides whether a client may be admitted right now.
///
/// Like [`Authenticator`](crate::Authenticator) this runs inside the
/// handshake and must not block on I/O.
pub trait RateLimiter: Send + Sync + 'static {
    /// Records an admission attempt for `key` and returns whether it is
    /// allowed. A denied attempt changes nothing.
    fn check(&self, key: &str) -> bool;

    /// Forgets keys that haven't been admitted for a while. Returns how
    /// many were dropped.
    fn prune(&self) -> usize;
}

/// Allows one admission per key per `window`.
#[derive(Debug)]
pub struct PerAddressRateLimiter {
    window: Duration,
    retention: Duration,
    last_admitted: Mutex<HashMap<String, Instant>>,
}

impl PerAddressRateLimiter {
    /// A zero `window` admits everything. Entries older than `retention`
    /// are dropped by [`prune`](RateLimiter::prune).
    pub fn new(window: Duration, retention: Duration) -> Self {
        Self {
            window,
            retention,
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RateLimiter for PerAddressRateLimiter {
    fn check(&self, key: &str) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut last_admitted = self
            .last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let recently_admitted = last_admitted
            .get(key)
            .is_some_and(|last| now.saturating_duration_since(*last) < self.window);
        if recently_admitted {
            return false;
        }
        last_admitted.insert(key.to_owned(), now);
        true
    }

    fn prune(&self) -> usize {
        let now = Instant::now();
        let mut last_admitted = self
            .last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = last_admitted.len();
        last_admitted.retain(|_, last| now.saturating_duration_since(*last) <= self.retention);
        before - last_admitted.len()
    }
}

/// The address a request is rate limited under: the first entry of
/// `X-Forwarded-For` when a proxy set one, the peer IP otherwise.
pub fn client_key(request: &UpgradeRequest) -> String {
    request
        .header("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map_or_else(|| request.peer().ip().to_string(), str::to_owned)
}
