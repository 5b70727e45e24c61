//! Server configuration.
//!
//! Loaded from environment variables with defaults for everything. The
//! client secret is redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use huddle_room::RoomConfig;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Secret used when `CLIENT_SECRET` is unset. Fine for local development,
/// never for a deployment.
pub const DEV_CLIENT_SECRET: &str = "planning-poker-secure-key-2025";

/// Rooms with no activity for this long are swept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How often the idle sweep runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// One admission per address per window.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Rate-limit entries older than this are pruned.
pub const DEFAULT_RATE_LIMIT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// How often stale rate-limit entries are pruned.
pub const DEFAULT_RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Shared secret clients must present in `X-Client-Secret`.
    pub client_secret: String,

    pub idle_timeout: Duration,
    pub sweep_interval: Duration,

    /// Zero disables rate limiting.
    pub rate_limit_window: Duration,
    pub rate_limit_retention: Duration,
    pub rate_limit_prune_interval: Duration,

    pub room: RoomConfig,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("client_secret", &"[REDACTED]")
            .field("idle_timeout", &self.idle_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_retention", &self.rate_limit_retention)
            .field("rate_limit_prune_interval", &self.rate_limit_prune_interval)
            .field("room", &self.room)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            client_secret: DEV_CLIENT_SECRET.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            rate_limit_retention: DEFAULT_RATE_LIMIT_RETENTION,
            rate_limit_prune_interval: DEFAULT_RATE_LIMIT_PRUNE_INTERVAL,
            room: RoomConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = vars
            .get("HUDDLE_BIND_ADDR")
            .cloned()
            .unwrap_or(defaults.bind_addr);

        let client_secret = match vars.get("CLIENT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret.clone(),
            None => {
                tracing::warn!("CLIENT_SECRET not set, using the development default");
                defaults.client_secret
            }
        };

        let idle_timeout = secs(vars, "HUDDLE_IDLE_TIMEOUT_SECS")?.unwrap_or(defaults.idle_timeout);
        let sweep_interval =
            secs(vars, "HUDDLE_SWEEP_INTERVAL_SECS")?.unwrap_or(defaults.sweep_interval);
        if sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "HUDDLE_SWEEP_INTERVAL_SECS",
                reason: "must be greater than 0".to_string(),
            });
        }

        let rate_limit_window = match parse_u64(vars, "HUDDLE_RATE_LIMIT_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.rate_limit_window,
        };

        Ok(Self {
            bind_addr,
            client_secret,
            idle_timeout,
            sweep_interval,
            rate_limit_window,
            ..defaults
        })
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }

    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_room_config(mut self, room: RoomConfig) -> Self {
        self.room = room;
        self
    }
}

fn parse_u64(
    vars: &HashMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    vars.get(var)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                var,
                reason: format!("expected a non-negative integer, got '{value}': {e}"),
            })
        })
        .transpose()
}

fn secs(
    vars: &HashMap<String, String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_u64(vars, var)?.map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_empty_uses_defaults() {
        let config = ServerConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.client_secret, DEV_CLIENT_SECRET);
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.rate_limit_window, Duration::from_secs(1));
        assert_eq!(config.rate_limit_retention, Duration::from_secs(300));
        assert_eq!(config.room, RoomConfig::default());
    }

    #[test]
    fn test_from_vars_reads_overrides() {
        let config = ServerConfig::from_vars(&vars(&[
            ("HUDDLE_BIND_ADDR", "0.0.0.0:9000"),
            ("CLIENT_SECRET", "s3cret"),
            ("HUDDLE_IDLE_TIMEOUT_SECS", "30"),
            ("HUDDLE_SWEEP_INTERVAL_SECS", "10"),
            ("HUDDLE_RATE_LIMIT_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.client_secret, "s3cret");
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert!(config.rate_limit_window.is_zero());
    }

    #[test]
    fn test_from_vars_empty_secret_falls_back_to_default() {
        let config = ServerConfig::from_vars(&vars(&[("CLIENT_SECRET", "")])).unwrap();
        assert_eq!(config.client_secret, DEV_CLIENT_SECRET);
    }

    #[test]
    fn test_from_vars_rejects_non_numeric() {
        let err = ServerConfig::from_vars(&vars(&[("HUDDLE_IDLE_TIMEOUT_SECS", "ten")]))
            .unwrap_err();
        assert!(err.to_string().contains("HUDDLE_IDLE_TIMEOUT_SECS"));
    }

    #[test]
    fn test_from_vars_rejects_zero_sweep_interval() {
        let result = ServerConfig::from_vars(&vars(&[("HUDDLE_SWEEP_INTERVAL_SECS", "0")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                var: "HUDDLE_SWEEP_INTERVAL_SECS",
                ..
            })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ServerConfig::default().with_client_secret("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
