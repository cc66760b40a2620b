//! Relay configuration from the environment.
//!
//! The relay keeps no on-disk state, so configuration is plain environment
//! variables. Malformed values are startup errors rather than silent
//! defaults.

use std::time::Duration;

use termlink_protocol::constants::{
    DEFAULT_OUTBOUND_QUEUE_LIMIT, DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS,
    DEFAULT_RELAY_PORT, DEFAULT_SESSION_CODE_EXPIRY_MS,
};

/// Runtime configuration for the relay process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// TCP port to listen on (`RELAY_PORT`, 0 = OS-assigned).
    pub port: u16,
    /// Unpaired code time-to-live (`SESSION_CODE_EXPIRY_MS`).
    pub code_expiry: Duration,
    /// Per-connection outbound queue bound (`OUTBOUND_QUEUE_LIMIT`).
    pub outbound_queue_limit: usize,
    /// Interval between keepalive pings (`PING_INTERVAL_MS`).
    pub ping_interval: Duration,
    /// Read deadline before a silent peer is closed (`PING_TIMEOUT_MS`).
    pub ping_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_RELAY_PORT,
            code_expiry: Duration::from_millis(DEFAULT_SESSION_CODE_EXPIRY_MS),
            outbound_queue_limit: DEFAULT_OUTBOUND_QUEUE_LIMIT,
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
        }
    }
}

impl RelayConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: parse_var(&get, "RELAY_PORT", defaults.port)?,
            code_expiry: Duration::from_millis(parse_var(
                &get,
                "SESSION_CODE_EXPIRY_MS",
                defaults.code_expiry.as_millis() as u64,
            )?),
            outbound_queue_limit: parse_var(
                &get,
                "OUTBOUND_QUEUE_LIMIT",
                defaults.outbound_queue_limit,
            )?,
            ping_interval: Duration::from_millis(parse_var(
                &get,
                "PING_INTERVAL_MS",
                defaults.ping_interval.as_millis() as u64,
            )?),
            ping_timeout: Duration::from_millis(parse_var(
                &get,
                "PING_TIMEOUT_MS",
                defaults.ping_timeout.as_millis() as u64,
            )?),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw,
        }),
    }
}

/// Errors from configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}
