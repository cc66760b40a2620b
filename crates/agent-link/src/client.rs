//! WebSocket client for the relay's `/mac` endpoint.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use termlink_protocol::code::SessionCode;
use termlink_protocol::constants::{REGISTER_WAIT, WS_MAX_MESSAGE_SIZE};
use termlink_protocol::frame::encode_frame;
use termlink_protocol::messages::{RelayToBrowser, SessionData};
use termlink_protocol::types::SessionId;

use crate::bridge::TerminalBridge;
use crate::{LinkError, SEND_BUFFER_SIZE, pumps};

/// Callback type for disconnect notification.
pub(crate) type DisconnectCallback = Arc<Mutex<Option<Box<dyn Fn() + Send + Sync>>>>;

/// The pair identity the relay assigned at registration.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// The code the user reads off this machine and types into the browser.
    pub code: SessionCode,
    /// The pair's stable session id, used to frame terminal bytes.
    pub session_id: SessionId,
}

/// A live connection to the relay.
///
/// [`connect`](Self::connect) performs the upgrade and waits for the
/// `registered` frame, so a returned client always has a pairing code.
pub struct RelayClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    on_disconnect: DisconnectCallback,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Connects to `url` (the relay's `/mac` endpoint) and completes the
    /// registration handshake.
    pub async fn connect<B: TerminalBridge>(
        url: &str,
        bridge: Arc<B>,
    ) -> Result<(Self, Registration), LinkError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(SEND_BUFFER_SIZE);
        let (reg_tx, reg_rx) = oneshot::channel();
        let registration_slot = Arc::new(Mutex::new(Some(reg_tx)));
        let on_disconnect: DisconnectCallback = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let on_disconnect = on_disconnect.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(pumps::read::read_pump(
                read,
                bridge,
                registration_slot,
                on_disconnect,
                write_tx,
                cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(pumps::ping::ping_pump(write_tx, cancel))
        };

        let client = Self {
            write_tx,
            on_disconnect,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        };

        let registration = match tokio::time::timeout(REGISTER_WAIT, reg_rx).await {
            Ok(Ok(reg)) => reg,
            Ok(Err(_)) => {
                client.cancel.cancel();
                return Err(LinkError::Closed);
            }
            Err(_) => {
                client.cancel.cancel();
                return Err(LinkError::RegisterTimeout);
            }
        };

        tracing::info!(code = %registration.code, "registered with relay");
        Ok((client, registration))
    }

    /// Sends an agent-originated event, wrapped in `session_data`.
    pub async fn send_event(&self, event: &RelayToBrowser) -> Result<(), LinkError> {
        let wrapper = SessionData::wrap(event)?;
        let json = serde_json::to_string(&wrapper)?;
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Sends raw terminal output over the binary fast path.
    pub async fn send_terminal_data(
        &self,
        session_id: SessionId,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let frame = encode_frame(session_id, payload);
        self.write_tx
            .send(tungstenite::Message::Binary(frame.into()))
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Sets the callback fired when the relay connection drops.
    pub async fn set_disconnect_callback(&self, cb: Box<dyn Fn() + Send + Sync>) {
        *self.on_disconnect.lock().await = Some(cb);
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}
