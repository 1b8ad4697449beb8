//! # Switchyard Server
//!
//! Serves configured broker endpoints over WebSocket and relays every message
//! a peer sends to all peers on the same endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchyard
//!
//! # Bind the default address elsewhere
//! SWITCHYARD_ADDRESS=0.0.0.0:9000 switchyard
//! ```

mod config;
mod metrics;
mod relay;

use anyhow::{Context, Result};
use switchyard_core::Broker;
use switchyard_transport::WebSocketListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }
    metrics::init_metrics();

    run(config).await
}

/// Run the relay until interrupted.
async fn run(config: config::Config) -> Result<()> {
    let broker = Broker::with_listener(
        config.broker_config(),
        WebSocketListener::new(config.websocket_config()),
    );
    let relays = relay::spawn_relays(&broker, &config.addresses);

    broker.start();
    info!(
        addresses = config.addresses.len(),
        "Switchyard running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    broker.shutdown().await;
    for handle in relays {
        if let Err(e) = handle.await {
            error!("Relay task failed: {}", e);
        }
    }

    Ok(())
}
