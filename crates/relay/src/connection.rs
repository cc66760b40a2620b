//! Per-connection plumbing: identities, bounded outbound queues, write pump.
//!
//! Every upgraded socket gets exactly two tasks: a reader (the role-specific
//! loop in [`crate::router`]) and a writer (the [`write_pump`] draining the
//! outbound queue). All sends to a peer go through its [`Sender`]; nothing
//! outside the write pump touches the socket sink.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocates the next identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection roles, fixed by the endpoint path at upgrade time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Browser,
}

/// Connection lifecycle states.
///
/// Payload traffic is legal only in `Active`; a payload frame in any earlier
/// state is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Agent upgraded, `registered` not yet sent.
    AwaitingRegister,
    /// Browser upgraded, no `join`/`rejoin` received yet.
    AwaitingJoin,
    /// `join`/`rejoin` received, registry decision pending.
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// Error queueing a message to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue full, connection closed as too slow")]
    Overflow,

    #[error("connection closed")]
    Closed,

    #[error("message could not be encoded")]
    Encode,
}

/// Handle for queueing messages to a connection. Cheap to clone.
///
/// The queue is bounded. A peer that cannot drain it is closed on the spot:
/// dropping the slow consumer preserves ordering for the stream that remains,
/// which is preferable to silently dropping messages.
#[derive(Debug, Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
}

impl Sender {
    /// Serializes a message and queues it as a text frame.
    pub fn send_msg<T: Serialize>(&self, msg: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(msg).map_err(|_| SendError::Encode)?;
        self.push(WsMessage::Text(json.into()))
    }

    /// Queues pre-serialized JSON text verbatim (the forwarding path).
    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.push(WsMessage::Text(text.into()))
    }

    /// Queues a raw binary frame.
    pub fn send_binary(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.push(WsMessage::Binary(frame.into()))
    }

    pub(crate) fn send_pong(&self, data: tokio_tungstenite::tungstenite::Bytes) {
        let _ = self.push(WsMessage::Pong(data));
    }

    fn push(&self, msg: WsMessage) -> Result<(), SendError> {
        use mpsc::error::TrySendError;
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("outbound queue full, closing slow connection");
                self.cancel.cancel();
                Err(SendError::Overflow)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Whether the connection can still receive messages.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }

    /// Asks the connection's tasks to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Creates the outbound queue for a connection.
///
/// `cancel` must be the connection's own token: queue overflow cancels it.
pub(crate) fn outbound_channel(
    limit: usize,
    cancel: CancellationToken,
) -> (Sender, mpsc::Receiver<WsMessage>) {
    let (tx, rx) = mpsc::channel(limit);
    (Sender { tx, cancel }, rx)
}

/// Write pump: drains the outbound queue and emits keepalive pings.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<WsMessage>,
    ping_interval: Duration,
    cancel: CancellationToken,
) where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = sink.send(m).await {
                            tracing::debug!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::debug!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Drain what is already queued so an error or teardown frame sent just
    // before the close is not lost, then say goodbye.
    while let Ok(m) = rx.try_recv() {
        if sink.send(m).await.is_err() {
            break;
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
    cancel.cancel();
}
