//! WebSocket read pump: dispatches relay commands to the terminal bridge.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use termlink_protocol::constants::{PONG_WAIT, WS_MAX_MESSAGE_SIZE};
use termlink_protocol::frame::decode_frame;
use termlink_protocol::messages::RelayToAgent;

use crate::bridge::TerminalBridge;
use crate::client::{DisconnectCallback, Registration};

/// Slot fulfilled by the first `registered` frame.
pub(crate) type RegistrationSlot = Arc<Mutex<Option<oneshot::Sender<Registration>>>>;

/// Reads relay frames and dispatches them.
///
/// The pong deadline doubles as a read deadline: any incoming frame resets
/// it, and silence past [`PONG_WAIT`] means the connection is dead.
pub(crate) async fn read_pump<S, B>(
    mut read: S,
    bridge: Arc<B>,
    registration: RegistrationSlot,
    on_disconnect: DisconnectCallback,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    B: TerminalBridge,
{
    let pong_deadline = tokio::time::sleep(PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("pong timeout, relay connection dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text(text.as_str(), &bridge, &registration).await;
                            }
                            tungstenite::Message::Binary(data) => {
                                match decode_frame(&data) {
                                    Ok((session_id, payload)) => {
                                        bridge.on_binary(session_id, payload.to_vec()).await;
                                    }
                                    Err(e) => warn!("malformed binary frame from relay: {e}"),
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("relay sent close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    bridge.on_relay_disconnected().await;
    if let Some(cb) = on_disconnect.lock().await.as_ref() {
        cb();
    }
}

/// Parses one relay text frame and dispatches it.
async fn handle_text<B: TerminalBridge>(
    text: &str,
    bridge: &Arc<B>,
    registration: &RegistrationSlot,
) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let msg: RelayToAgent = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("unparsable relay message: {e}");
            return;
        }
    };

    match msg {
        RelayToAgent::Registered { code, session_id } => {
            match registration.lock().await.take() {
                Some(tx) => {
                    let _ = tx.send(Registration { code, session_id });
                }
                None => warn!(%code, "unexpected duplicate registered frame"),
            }
        }
        RelayToAgent::BrowserConnected => bridge.on_browser_connected().await,
        RelayToAgent::BrowserDisconnected => bridge.on_browser_disconnected().await,
        RelayToAgent::TerminalInput {
            session_id,
            payload,
        } => bridge.on_terminal_input(session_id, payload).await,
        RelayToAgent::TerminalResize {
            session_id,
            cols,
            rows,
        } => bridge.on_terminal_resize(session_id, cols, rows).await,
        RelayToAgent::RequestScreenRefresh { session_id } => {
            bridge.on_screen_refresh_requested(session_id).await
        }
        RelayToAgent::TabSwitch { tab_id } => bridge.on_tab_switch(tab_id).await,
        RelayToAgent::TabCreate => bridge.on_tab_create().await,
        RelayToAgent::TabClose { tab_id } => bridge.on_tab_close(tab_id).await,
    }
}
