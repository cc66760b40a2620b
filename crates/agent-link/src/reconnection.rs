//! Reconnection loop with exponential backoff.
//!
//! The relay destroys a pair when its agent disconnects, so there is nothing
//! to resume: each successful (re)connect registers a brand-new pair and the
//! fresh code is surfaced through [`LinkEvent::Registered`].

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::TerminalBridge;
use crate::client::RelayClient;
use crate::types::{LinkEvent, LinkState, ReconnectConfig};

/// Maintains a relay connection until `cancel` fires.
///
/// Emits [`LinkEvent`]s on `events_tx`; the caller renders them (menu-bar
/// state, the code the user reads out). Dropped events are not fatal.
pub async fn run_with_reconnect<B: TerminalBridge>(
    url: String,
    bridge: Arc<B>,
    config: ReconnectConfig,
    events_tx: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let state = if attempt == 0 {
            LinkState::Connecting
        } else {
            LinkState::Reconnecting { attempt }
        };
        let _ = events_tx.send(LinkEvent::StateChanged(state)).await;

        match RelayClient::connect(&url, bridge.clone()).await {
            Ok((client, registration)) => {
                attempt = 0;
                let _ = events_tx
                    .send(LinkEvent::Registered {
                        code: registration.code,
                        session_id: registration.session_id,
                    })
                    .await;
                let _ = events_tx
                    .send(LinkEvent::StateChanged(LinkState::Active))
                    .await;
                info!(code = %registration.code, "relay link active");

                let lost = Arc::new(Notify::new());
                let lost2 = lost.clone();
                client
                    .set_disconnect_callback(Box::new(move || {
                        lost2.notify_one();
                    }))
                    .await;

                tokio::select! {
                    _ = cancel.cancelled() => {
                        client.close().await;
                        break;
                    }
                    _ = lost.notified() => {
                        warn!("relay connection lost");
                    }
                }
            }
            Err(e) => {
                warn!(attempt, "relay connect failed: {e}");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = config.delay_for_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let _ = events_tx
        .send(LinkEvent::StateChanged(LinkState::Closed))
        .await;
}
