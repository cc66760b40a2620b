//! The Mac agent's connection to the termlink relay.
//!
//! Connects to the relay's `/mac` endpoint, surfaces the pairing code the
//! relay assigns, and shuttles traffic between the relay and the local
//! terminal multiplexer integration (a [`TerminalBridge`] implementation).
//! Reconnects with exponential backoff; every reconnect yields a fresh
//! pairing code because the old pair dies with the old socket.

mod bridge;
mod client;
mod pumps;
mod reconnection;
mod types;

pub use bridge::{BridgeFuture, TerminalBridge};
pub use client::{Registration, RelayClient};
pub use reconnection::run_with_reconnect;
pub use types::{LinkEvent, LinkState, ReconnectConfig};

/// Outbound queue capacity for the relay connection.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors from the relay link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for registration")]
    RegisterTimeout,

    #[error("connection closed")]
    Closed,
}
