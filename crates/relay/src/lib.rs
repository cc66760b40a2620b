//! The termlink relay: pairs a Mac agent with a browser viewer and routes
//! terminal traffic between them.
//!
//! An agent connects to `/mac` and is handed a six-character pairing code.
//! A browser connects to `/browser`, presents the code (or a session id
//! after a reload), and from then on the relay forwards keystrokes, resize
//! and tab commands toward the agent, and terminal output toward the
//! browser. Terminal bytes travel as binary frames and are never parsed.
//!
//! The only process-wide state is the [`registry::Registry`]; everything
//! else is owned by exactly one connection task.

pub mod config;
pub mod connection;
pub mod registry;
mod router;
pub mod server;

pub use config::{ConfigError, RelayConfig};
pub use connection::{ConnId, ConnState, Role, SendError, Sender};
pub use registry::{CreatePairError, JoinError, Registry, RejoinError};
pub use server::RelayServer;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
