//! `HuddleServer` builder and server loop.
//!
//! This is the entry point for running a Huddle server. It ties together
//! all the layers: transport → session → room, plus the two maintenance
//! tasks (idle-room sweep, rate-limit pruning).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use huddle_protocol::JsonCodec;
use huddle_room::RoomRegistry;
use huddle_session::{Authenticator, PerAddressRateLimiter, RateLimiter, SharedSecret};
use huddle_transport::{Transport, TransportError, WebSocketTransport};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::HuddleError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator, L: RateLimiter> {
    pub(crate) registry: RoomRegistry,
    pub(crate) auth: A,
    pub(crate) limiter: L,
    pub(crate) codec: Arc<JsonCodec>,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Huddle server.
///
/// # Example
///
/// ```rust,ignore
/// use huddle::prelude::*;
///
/// let server = HuddleServer::builder()
///     .config(ServerConfig::from_env()?)
///     .build()
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Default)]
pub struct HuddleServerBuilder {
    config: ServerConfig,
    registry: Option<RoomRegistry>,
}

impl HuddleServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Serves rooms from an existing registry instead of a fresh one, so
    /// rooms created through [`RoomRegistry::create_room`] are joinable.
    pub fn registry(mut self, registry: RoomRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Binds the listener with the configured shared secret and a
    /// per-address rate limiter.
    pub async fn build(
        self,
    ) -> Result<HuddleServer<SharedSecret, PerAddressRateLimiter>, HuddleError> {
        let auth = SharedSecret::new(&self.config.client_secret);
        let limiter = PerAddressRateLimiter::new(
            self.config.rate_limit_window,
            self.config.rate_limit_retention,
        );
        self.build_with(auth, limiter).await
    }

    /// Binds the listener with a custom authenticator and rate limiter.
    pub async fn build_with<A, L>(
        self,
        auth: A,
        limiter: L,
    ) -> Result<HuddleServer<A, L>, HuddleError>
    where
        A: Authenticator,
        L: RateLimiter,
    {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let registry = self
            .registry
            .unwrap_or_else(|| RoomRegistry::new(self.config.room.clone()));

        let state = Arc::new(ServerState {
            registry,
            auth,
            limiter,
            codec: Arc::new(JsonCodec),
            config: self.config,
        });

        Ok(HuddleServer { transport, state })
    }
}

/// A bound Huddle server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct HuddleServer<A: Authenticator, L: RateLimiter> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, L>>,
}

impl HuddleServer<SharedSecret, PerAddressRateLimiter> {
    pub fn builder() -> HuddleServerBuilder {
        HuddleServerBuilder::new()
    }
}

impl<A, L> HuddleServer<A, L>
where
    A: Authenticator,
    L: RateLimiter,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry rooms are served from.
    pub fn registry(&self) -> &RoomRegistry {
        &self.state.registry
    }

    /// Runs the accept loop and the maintenance tasks.
    ///
    /// Spawns a handler task per accepted connection. Runs until the
    /// returned future is dropped, which also stops the maintenance tasks.
    pub async fn run(mut self) -> Result<(), HuddleError> {
        let config = &self.state.config;
        tracing::info!(
            addr = %self.local_addr().map_err(TransportError::AcceptFailed)?,
            idle_timeout = ?config.idle_timeout,
            rate_limit_window = ?config.rate_limit_window,
            "Huddle server running"
        );

        let _maintenance = Maintenance::start(Arc::clone(&self.state));

        loop {
            match self.transport.accept().await {
                Ok(pending) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(pending, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Background tasks tied to the lifetime of [`HuddleServer::run`].
struct Maintenance {
    tasks: Vec<JoinHandle<()>>,
}

impl Maintenance {
    fn start<A: Authenticator, L: RateLimiter>(state: Arc<ServerState<A, L>>) -> Self {
        let sweep = tokio::spawn(sweep_loop(
            state.registry.clone(),
            state.config.sweep_interval,
            state.config.idle_timeout,
        ));
        let prune = tokio::spawn(prune_loop(state));
        Self {
            tasks: vec![sweep, prune],
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // The first tick of an interval completes immediately.
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn sweep_loop(registry: RoomRegistry, every: Duration, idle_timeout: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        let evicted = registry.sweep(idle_timeout).await;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), rooms = ?evicted, "swept idle rooms");
        }
    }
}

async fn prune_loop<A: Authenticator, L: RateLimiter>(state: Arc<ServerState<A, L>>) {
    let mut interval = ticker(state.config.rate_limit_prune_interval);
    loop {
        interval.tick().await;
        let pruned = state.limiter.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned rate limit entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use huddle_protocol::ClientId;
    use huddle_room::{Member, RoomConfig, RoomError, outbound_channel};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_evicts_idle_rooms_each_interval() {
        let registry = RoomRegistry::new(RoomConfig::default());
        let idle = registry.create_room().unwrap();
        let busy = registry.create_room().unwrap();
        let (tx, _rx) = outbound_channel(8);
        busy.join(Member::participant(ClientId(1), "Alice", tx))
            .await
            .unwrap();

        let task = tokio::spawn(sweep_loop(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(600),
        ));

        // Empty rooms go on the first sweep.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(matches!(
            registry.get(idle.code()),
            Err(RoomError::NotFound(_))
        ));
        assert!(registry.get(busy.code()).is_ok());

        // The occupied room goes once it has been idle past the timeout.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(registry.get(busy.code()).is_err());
        assert!(registry.is_empty());

        task.abort();
    }
}
