//! Room registry: creates rooms, looks them up by code, and sweeps idle
//! ones.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use huddle_protocol::RoomCode;

use crate::code::random_code;
use crate::room::spawn_room;
use crate::{RoomConfig, RoomError, RoomHandle};

/// All live rooms, keyed by code.
///
/// Cheap to clone; clones share the same map. Lookups and creation take a
/// short std lock and never await, so the registry can be used from
/// synchronous code such as the WebSocket handshake callback.
///
/// A room leaves the registry either when its last member leaves (the
/// actor removes itself) or when [`sweep`](Self::sweep) evicts it. Both
/// paths may race for the same entry; the loser's removal is a no-op.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    config: RoomConfig,
    state: RwLock<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    rooms: HashMap<RoomCode, RoomHandle>,
    /// Codes of recently retired rooms, oldest first. Not reissued while
    /// remembered.
    retired: VecDeque<RoomCode>,
    retired_set: HashSet<RoomCode>,
}

impl RegistryState {
    fn is_free(&self, code: &RoomCode) -> bool {
        !self.rooms.contains_key(code) && !self.retired_set.contains(code)
    }

    /// Unregisters a room and remembers its code, forgetting the oldest
    /// remembered code once `memory` is exceeded.
    fn retire(&mut self, code: &RoomCode, memory: usize) -> Option<RoomHandle> {
        let removed = self.rooms.remove(code)?;
        if memory > 0 && self.retired_set.insert(code.clone()) {
            self.retired.push_back(code.clone());
        }
        while self.retired.len() > memory {
            if let Some(oldest) = self.retired.pop_front() {
                self.retired_set.remove(&oldest);
            }
        }
        Some(removed)
    }
}

impl RoomRegistry {
    /// Creates a new, empty registry.
    pub fn new(config: RoomConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(RegistryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.inner.config
    }

    /// Creates a room under a fresh code and starts its actor.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// [`RoomError::CodesExhausted`] if `max_code_attempts` random codes
    /// were all taken.
    pub fn create_room(&self) -> Result<RoomHandle, RoomError> {
        let config = &self.inner.config;
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let code = (0..config.max_code_attempts)
            .map(|_| random_code(config.code_length))
            .find(|code| state.is_free(code))
            .ok_or(RoomError::CodesExhausted(config.max_code_attempts))?;

        let registry = Arc::downgrade(&self.inner);
        let handle = spawn_room(
            code.clone(),
            config,
            Some(Box::new(move |code: &RoomCode| retire(&registry, code))),
        );
        state.rooms.insert(code.clone(), handle.clone());

        tracing::info!(room = %code, rooms = state.rooms.len(), "room created");
        Ok(handle)
    }

    /// Looks up a live room.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if no room is registered under `code`.
    pub fn get(&self, code: &RoomCode) -> Result<RoomHandle, RoomError> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .get(code)
            .cloned()
            .ok_or_else(|| RoomError::NotFound(code.clone()))
    }

    /// Removes a room from the registry without stopping it. Returns the
    /// handle if the room was still registered; removing twice is a no-op.
    pub fn remove(&self, code: &RoomCode) -> Option<RoomHandle> {
        remove_entry(&self.inner, code)
    }

    /// Returns cloned handles to all registered rooms.
    pub fn handles(&self) -> Vec<RoomHandle> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .values()
            .cloned()
            .collect()
    }

    /// Returns the number of registered rooms.
    pub fn len(&self) -> usize {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts every room that is empty or has been idle longer than
    /// `idle_timeout`, shutting its actor down so every member's queue (and
    /// with it the member's connection) is closed. Returns the evicted codes.
    pub async fn sweep(&self, idle_timeout: Duration) -> Vec<RoomCode> {
        let evicted: Vec<RoomHandle> = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let stale: Vec<RoomCode> = state
                .rooms
                .iter()
                .filter(|(_, handle)| {
                    let activity = handle.activity();
                    activity.member_count() == 0 || activity.idle_for() > idle_timeout
                })
                .map(|(code, _)| code.clone())
                .collect();
            let memory = self.inner.config.retired_code_memory;
            stale
                .iter()
                .filter_map(|code| state.retire(code, memory))
                .collect()
        };

        let mut codes = Vec::with_capacity(evicted.len());
        for handle in evicted {
            let activity = handle.activity();
            tracing::info!(
                room = %handle.code(),
                members = activity.member_count(),
                idle_secs = activity.idle_for().as_secs(),
                "sweeping room"
            );
            // An actor that already stopped has nothing left to close.
            let _ = handle.shutdown().await;
            codes.push(handle.code().clone());
        }
        codes
    }
}

fn remove_entry(inner: &Inner, code: &RoomCode) -> Option<RoomHandle> {
    let removed = inner
        .state
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .retire(code, inner.config.retired_code_memory);
    if removed.is_some() {
        tracing::debug!(room = %code, "room removed from registry");
    }
    removed
}

/// Retire hook run by a room actor whose last member left.
fn retire(registry: &Weak<Inner>, code: &RoomCode) {
    if let Some(inner) = registry.upgrade() {
        remove_entry(&inner, code);
    }
}
