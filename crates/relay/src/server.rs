//! Relay server: acceptor, upgrade routing, and lifecycle.
//!
//! Listens on one TCP port and upgrades exactly two paths: `/mac` for
//! agents, `/browser` for viewers. Anything else is answered with HTTP 404.
//! Each upgraded socket gets a bounded outbound queue, a write pump, and a
//! role-specific read loop, all parented to the server's cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use termlink_protocol::constants::{HANDSHAKE_TIMEOUT, SWEEP_INTERVAL, WS_MAX_MESSAGE_SIZE};

use crate::RelayError;
use crate::config::RelayConfig;
use crate::connection::{ConnId, Role, outbound_channel, write_pump};
use crate::registry::Registry;
use crate::router;

/// Time allowed for in-flight connections to drain after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The relay process core: one listener, one registry, many connections.
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<Registry>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let registry = Arc::new(Registry::new(config.code_expiry));
        Arc::new(Self {
            config,
            registry,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// The session registry, shared with diagnostics and tests.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Returns the bound address, once [`run`](Self::run) has bound it.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Begins graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), RelayError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay listening on {local_addr}");

        self.tracker
            .spawn(sweeper(Arc::clone(&self.registry), self.cancel.clone()));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            self.tracker.spawn(async move {
                                server.handle_connection(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
        drop(listener);

        tracing::info!("relay shutting down");
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("grace period elapsed with connection tasks still running");
        }
        Ok(())
    }

    /// Upgrades one TCP connection and runs it to completion.
    async fn handle_connection(self: &Arc<Self>, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let mut role = None;
        let callback = |req: &Request, resp: Response| match req.uri().path() {
            "/mac" => {
                role = Some(Role::Agent);
                Ok(resp)
            }
            "/browser" => {
                role = Some(Role::Browser);
                Ok(resp)
            }
            other => {
                tracing::debug!(%peer_addr, path = other, "rejecting unknown path");
                let mut not_found = ErrorResponse::new(Some("not found".into()));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Err(not_found)
            }
        };

        let upgrade = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            accept_hdr_async_with_config(stream, callback, Some(ws_config)),
        )
        .await;
        let ws_stream = match upgrade {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                tracing::debug!(%peer_addr, "handshake failed: {e}");
                return;
            }
            Err(_) => {
                tracing::debug!(%peer_addr, "handshake timed out");
                return;
            }
        };
        let Some(role) = role else { return };

        let conn_id = ConnId::next();
        let cancel = self.cancel.child_token();
        let (sender, outbound_rx) =
            outbound_channel(self.config.outbound_queue_limit, cancel.clone());
        let (sink, stream) = ws_stream.split();

        self.tracker.spawn(write_pump(
            sink,
            outbound_rx,
            self.config.ping_interval,
            cancel.clone(),
        ));

        match role {
            Role::Agent => {
                tracing::info!(%peer_addr, conn = %conn_id, "agent connected");
                router::run_agent(
                    stream,
                    conn_id,
                    sender,
                    Arc::clone(&self.registry),
                    self.config.ping_timeout,
                    cancel,
                )
                .await;
            }
            Role::Browser => {
                tracing::info!(%peer_addr, conn = %conn_id, "browser connected");
                router::run_browser(
                    stream,
                    conn_id,
                    sender,
                    Arc::clone(&self.registry),
                    self.config.ping_timeout,
                    cancel,
                )
                .await;
            }
        }
    }
}

/// Periodically reclaims expired unpaired codes.
async fn sweeper(registry: Arc<Registry>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let removed = registry.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired pairs");
                }
            }
        }
    }
}
