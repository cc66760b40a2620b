//! termlink relay server entry point.

use std::sync::Arc;

use termlink_relay::{RelayConfig, RelayServer};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting termlink relay"
    );

    let config = RelayConfig::from_env()?;
    tracing::info!(port = config.port, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("relay shut down cleanly");
    Ok(())
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let server = RelayServer::new(config);
    let server2 = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server2.run().await });

    wait_for_signal().await;
    tracing::info!("shutdown signal received");
    server.shutdown();

    server_handle.await??;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
