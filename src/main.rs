//! gripper-bridge server entry point.
//!
//! Loads configuration, binds the listener and runs the bridge until
//! Ctrl-C or SIGTERM. Exits non-zero on invalid configuration or when the
//! listen port cannot be bound.

use gripper_bridge::config::BridgeConfig;
use gripper_bridge::server::{BridgeServer, shutdown_signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = BridgeConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr(),
        bus = %config.bus_endpoint,
        "starting gripper-bridge"
    );

    // Bind and wire everything
    let server = BridgeServer::bind(&config).await?;

    // Stop on Ctrl-C / SIGTERM
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}
