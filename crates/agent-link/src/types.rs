//! Public types for the relay link.

use std::time::Duration;

use termlink_protocol::code::SessionCode;
use termlink_protocol::types::SessionId;

/// Connection state of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Handshake (upgrade plus registration) in progress.
    Connecting,
    /// Registered; terminal traffic can flow.
    Active,
    /// Connection lost, backoff in progress.
    Reconnecting { attempt: u32 },
    /// Link shut down; no further attempts.
    Closed,
}

/// Events emitted by [`crate::run_with_reconnect`].
#[derive(Debug, Clone, Copy)]
pub enum LinkEvent {
    /// A pair exists at the relay. Every reconnect mints a fresh one, so the
    /// code shown to the user must be replaced each time this fires.
    Registered {
        code: SessionCode,
        session_id: SessionId,
    },
    /// The link's state changed.
    StateChanged(LinkState),
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with about 25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}
