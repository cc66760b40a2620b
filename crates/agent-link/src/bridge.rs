//! The seam to the local terminal multiplexer.
//!
//! The relay link calls into a [`TerminalBridge`] for everything a viewer
//! asks of the terminal; producing output back to the viewer goes through
//! [`crate::RelayClient`]. Default implementations log and drop, so an
//! integration overrides only what it supports.

use std::future::Future;
use std::pin::Pin;

use termlink_protocol::types::SessionId;

/// A boxed future returned by bridge methods.
pub type BridgeFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Callbacks from the relay link into the terminal integration.
pub trait TerminalBridge: Send + Sync + 'static {
    /// A viewer attached to this agent's session.
    fn on_browser_connected(&self) -> BridgeFuture<'_> {
        Box::pin(async {})
    }

    /// The viewer detached; it may rejoin within the expiry window.
    fn on_browser_disconnected(&self) -> BridgeFuture<'_> {
        Box::pin(async {})
    }

    /// Keystrokes for a terminal session.
    fn on_terminal_input(&self, session_id: SessionId, payload: String) -> BridgeFuture<'_> {
        let _ = (session_id, payload);
        Box::pin(async {
            tracing::warn!("terminal input received but bridge does not implement it");
        })
    }

    /// The viewer's terminal widget changed dimensions.
    fn on_terminal_resize(&self, session_id: SessionId, cols: u16, rows: u16) -> BridgeFuture<'_> {
        let _ = (session_id, cols, rows);
        Box::pin(async {
            tracing::warn!("terminal resize received but bridge does not implement it");
        })
    }

    /// The viewer wants a full screen repaint (e.g. after rejoin).
    fn on_screen_refresh_requested(&self, session_id: SessionId) -> BridgeFuture<'_> {
        let _ = session_id;
        Box::pin(async {
            tracing::warn!("screen refresh requested but bridge does not implement it");
        })
    }

    fn on_tab_switch(&self, tab_id: String) -> BridgeFuture<'_> {
        let _ = tab_id;
        Box::pin(async {
            tracing::warn!("tab switch received but bridge does not implement it");
        })
    }

    fn on_tab_create(&self) -> BridgeFuture<'_> {
        Box::pin(async {
            tracing::warn!("tab create received but bridge does not implement it");
        })
    }

    fn on_tab_close(&self, tab_id: String) -> BridgeFuture<'_> {
        let _ = tab_id;
        Box::pin(async {
            tracing::warn!("tab close received but bridge does not implement it");
        })
    }

    /// Raw bytes from the viewer over the binary fast path.
    fn on_binary(&self, session_id: SessionId, data: Vec<u8>) -> BridgeFuture<'_> {
        let _ = (session_id, data);
        Box::pin(async {
            tracing::warn!("binary frame received but bridge does not implement it");
        })
    }

    /// The relay connection dropped (cleanup hook).
    fn on_relay_disconnected(&self) -> BridgeFuture<'_> {
        Box::pin(async {})
    }
}
