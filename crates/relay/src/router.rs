//! Per-connection read loops: the role state machines and forwarding rules.
//!
//! One reader task per socket. The agent loop registers a pair before
//! anything else; the browser loop demands `join`/`rejoin` as the first
//! frame. Only `Active` connections may move payloads. Liveness is a read
//! deadline: any inbound frame resets it, and silence past the pong wait
//! closes the connection as dead.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use termlink_protocol::frame::decode_frame;
use termlink_protocol::messages::{
    BrowserToRelay, ErrorCode, RelayToAgent, RelayToBrowser, SessionData,
};
use termlink_protocol::types::SessionId;

use crate::connection::{ConnId, ConnState, Sender};
use crate::registry::{Peer, Registry};

type WsError = tokio_tungstenite::tungstenite::Error;

/// Outcome of handling one frame while `Active`.
enum Handled {
    /// Keep reading.
    Continue,
    /// Protocol violation or dead pair: stop reading and tear down.
    Close,
}

/// Read loop for an agent connection on `/mac`.
///
/// Starts in `AwaitingRegister`: synthesizes the pair and transmits
/// `registered` before consuming any frame, then goes `Active` and forwards
/// `session_data` payloads and binary frames to the paired browser. On exit
/// the pair is destroyed and the browser, if attached, is told the session
/// is gone.
pub(crate) async fn run_agent<S>(
    mut stream: S,
    conn_id: ConnId,
    sender: Sender,
    registry: Arc<Registry>,
    pong_wait: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<WsMessage, WsError>> + Unpin,
{
    let registered = registry.create_pair(Peer {
        conn_id,
        sender: sender.clone(),
    });
    let new_pair = match registered {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(conn = %conn_id, "cannot register agent: {e}");
            cancel.cancel();
            return;
        }
    };

    let first = RelayToAgent::Registered {
        code: new_pair.code,
        session_id: new_pair.session_id,
    };
    if sender.send_msg(&first).is_err() {
        registry.remove_pair(new_pair.code);
        cancel.cancel();
        return;
    }
    tracing::info!(conn = %conn_id, code = %new_pair.code, "agent registered");

    let pong_deadline = tokio::time::sleep(pong_wait);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                tracing::warn!(conn = %conn_id, "pong timeout, closing dead agent");
                break;
            }

            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let Ok(msg) = frame else {
                    tracing::debug!(conn = %conn_id, "agent read error");
                    break;
                };
                pong_deadline.as_mut().reset(tokio::time::Instant::now() + pong_wait);

                let handled = match msg {
                    WsMessage::Text(text) => handle_agent_text(text.as_str(), conn_id, &registry),
                    WsMessage::Binary(data) => handle_agent_binary(&data, conn_id, &registry),
                    WsMessage::Ping(data) => {
                        sender.send_pong(data);
                        Handled::Continue
                    }
                    WsMessage::Pong(_) => Handled::Continue,
                    WsMessage::Close(_) => Handled::Close,
                    WsMessage::Frame(_) => Handled::Continue,
                };
                if matches!(handled, Handled::Close) {
                    break;
                }
            }
        }
    }

    if let Some(removed) = registry.remove_pair_by_agent(conn_id) {
        if let Some(browser) = removed.browser {
            let notice = RelayToBrowser::SessionDisconnected {
                session_id: removed.session_id,
            };
            let _ = browser.send_msg(&notice);
            browser.close();
        }
        tracing::info!(conn = %conn_id, code = %removed.code, "agent disconnected, pair removed");
    }
    cancel.cancel();
}

/// Validates a `session_data` wrapper and forwards its payload verbatim.
fn handle_agent_text(text: &str, conn_id: ConnId, registry: &Registry) -> Handled {
    let wrapper: SessionData = match serde_json::from_str(text) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(conn = %conn_id, "invalid agent message: {e}");
            return Handled::Close;
        }
    };
    let event = match wrapper.event() {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(conn = %conn_id, "invalid session_data payload: {e}");
            return Handled::Close;
        }
    };
    if !event.is_agent_originated() {
        tracing::warn!(conn = %conn_id, "agent sent a relay-minted kind");
        return Handled::Close;
    }

    let Some(route) = registry.agent_route(conn_id) else {
        return Handled::Close;
    };
    match route.browser {
        // Forward the original payload bytes; the relay rewrites nothing.
        Some(browser) => {
            let _ = browser.send_text(wrapper.payload_json().to_owned());
        }
        // No viewer attached: discard. Terminal state is refreshed on rejoin.
        None => tracing::trace!(conn = %conn_id, "no browser attached, dropping event"),
    }
    Handled::Continue
}

/// Confirms a binary frame targets the agent's own pair, then forwards it.
fn handle_agent_binary(data: &[u8], conn_id: ConnId, registry: &Registry) -> Handled {
    let (session_id, _payload) = match decode_frame(data) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(conn = %conn_id, "malformed binary frame: {e}");
            return Handled::Close;
        }
    };

    let Some(route) = registry.agent_route(conn_id) else {
        return Handled::Close;
    };
    if session_id != route.session_id {
        // Stale frame for a session this pair does not own; drop it.
        tracing::warn!(conn = %conn_id, %session_id, "binary frame for foreign session dropped");
        return Handled::Continue;
    }
    if let Some(browser) = route.browser {
        let _ = browser.send_binary(data.to_vec());
    }
    Handled::Continue
}

/// Read loop for a browser connection on `/browser`.
///
/// The first frame must be `join` or `rejoin`; afterwards browser commands
/// are forwarded to the paired agent. On exit after a successful join the
/// pair survives with a fresh expiry so the browser can rejoin.
pub(crate) async fn run_browser<S>(
    mut stream: S,
    conn_id: ConnId,
    sender: Sender,
    registry: Arc<Registry>,
    pong_wait: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut state = ConnState::AwaitingJoin;

    let pong_deadline = tokio::time::sleep(pong_wait);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                tracing::warn!(conn = %conn_id, "pong timeout, closing dead browser");
                break;
            }

            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let Ok(msg) = frame else {
                    tracing::debug!(conn = %conn_id, "browser read error");
                    break;
                };
                pong_deadline.as_mut().reset(tokio::time::Instant::now() + pong_wait);

                let handled = match msg {
                    WsMessage::Text(text) => match state {
                        ConnState::AwaitingJoin => {
                            let (next, handled) =
                                handle_browser_first(text.as_str(), conn_id, &sender, &registry);
                            state = next;
                            handled
                        }
                        ConnState::Active => {
                            handle_browser_active(text.as_str(), conn_id, &sender, &registry)
                        }
                        _ => Handled::Close,
                    },
                    WsMessage::Binary(data) => match state {
                        ConnState::Active => {
                            handle_browser_binary(&data, conn_id, &sender, &registry)
                        }
                        _ => {
                            let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
                            Handled::Close
                        }
                    },
                    WsMessage::Ping(data) => {
                        sender.send_pong(data);
                        Handled::Continue
                    }
                    WsMessage::Pong(_) => Handled::Continue,
                    WsMessage::Close(_) => Handled::Close,
                    WsMessage::Frame(_) => Handled::Continue,
                };
                if matches!(handled, Handled::Close) {
                    break;
                }
            }
        }
    }

    if state == ConnState::Active {
        if let Some(agent) = registry.disconnect_browser(conn_id) {
            let _ = agent.send_msg(&RelayToAgent::BrowserDisconnected);
            tracing::info!(conn = %conn_id, "browser disconnected, awaiting rejoin");
        }
    }
    cancel.cancel();
}

/// Handles the first browser frame: `join` or `rejoin`, nothing else.
///
/// The connection passes through `Authenticating` while the registry
/// decides; the decision either promotes it to `Active` or ends it with an
/// `error` frame.
fn handle_browser_first(
    text: &str,
    conn_id: ConnId,
    sender: &Sender,
    registry: &Registry,
) -> (ConnState, Handled) {
    let msg: BrowserToRelay = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn = %conn_id, "invalid first browser frame: {e}");
            let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
            return (ConnState::Closed, Handled::Close);
        }
    };

    let peer = Peer {
        conn_id,
        sender: sender.clone(),
    };
    let result = match msg {
        BrowserToRelay::Join { code } => registry
            .join(&code, peer)
            .map_err(|e| RelayToBrowser::error(e.error_code())),
        BrowserToRelay::Rejoin { session_id } => registry
            .rejoin(&session_id, peer)
            .map_err(|e| RelayToBrowser::error(e.error_code())),
        _ => {
            tracing::warn!(conn = %conn_id, "first browser frame was not join/rejoin");
            let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
            return (ConnState::Closed, Handled::Close);
        }
    };

    match result {
        Ok(joined) => {
            let _ = sender.send_msg(&RelayToBrowser::Joined {
                session_id: joined.session_id,
            });
            let _ = joined.agent.send_msg(&RelayToAgent::BrowserConnected);
            tracing::info!(conn = %conn_id, session = %joined.session_id, "browser joined");
            (ConnState::Active, Handled::Continue)
        }
        Err(error_frame) => {
            let _ = sender.send_msg(&error_frame);
            (ConnState::Closed, Handled::Close)
        }
    }
}

/// Handles a browser text frame while `Active`.
fn handle_browser_active(
    text: &str,
    conn_id: ConnId,
    sender: &Sender,
    registry: &Registry,
) -> Handled {
    let msg: BrowserToRelay = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn = %conn_id, "invalid browser message: {e}");
            let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
            return Handled::Close;
        }
    };

    match msg {
        BrowserToRelay::Join { .. } | BrowserToRelay::Rejoin { .. } => {
            tracing::warn!(conn = %conn_id, "join while already active");
            let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
            Handled::Close
        }
        BrowserToRelay::Ping => {
            let _ = sender.send_msg(&RelayToBrowser::Pong);
            Handled::Continue
        }
        other => {
            let Some(route) = registry.browser_route(conn_id) else {
                // Pair vanished under us (agent death races the close).
                return Handled::Close;
            };
            if let Some(addressed) = addressed_session(&other) {
                if addressed != route.session_id {
                    let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::SessionNotFound));
                    return Handled::Continue;
                }
            }
            match RelayToAgent::from_browser(other) {
                Some(out) => {
                    let _ = route.agent.send_msg(&out);
                }
                None => {
                    let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
                    return Handled::Close;
                }
            }
            Handled::Continue
        }
    }
}

/// Confirms a browser binary frame targets its own pair, then forwards it.
fn handle_browser_binary(
    data: &[u8],
    conn_id: ConnId,
    sender: &Sender,
    registry: &Registry,
) -> Handled {
    let (session_id, _payload) = match decode_frame(data) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(conn = %conn_id, "malformed binary frame: {e}");
            let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::InvalidMessage));
            return Handled::Close;
        }
    };

    let Some(route) = registry.browser_route(conn_id) else {
        return Handled::Close;
    };
    if session_id != route.session_id {
        let _ = sender.send_msg(&RelayToBrowser::error(ErrorCode::SessionNotFound));
        return Handled::Continue;
    }
    let _ = route.agent.send_binary(data.to_vec());
    Handled::Continue
}

/// The session a browser message addresses, for kinds that carry one.
fn addressed_session(msg: &BrowserToRelay) -> Option<SessionId> {
    match msg {
        BrowserToRelay::TerminalInput { session_id, .. }
        | BrowserToRelay::TerminalResize { session_id, .. }
        | BrowserToRelay::RequestScreenRefresh { session_id } => Some(*session_id),
        _ => None,
    }
}
