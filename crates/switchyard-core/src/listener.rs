//! Per-address network listeners.
//!
//! The broker does not know about sockets. A [`Listener`] is handed the
//! address name, a [`Connector`] to admit peers through and a stop signal;
//! the broker spawns one per address on start and tears them down on
//! shutdown.

use crate::broker::Connector;
use crate::signal::{StopHandle, StopSignal};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Listener errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Could not bind the address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// The address name that was bound.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other serving failure.
    #[error("Serve failed: {0}")]
    Serve(String),
}

/// Accepts remote peers for one address.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Serve `address` until `stop` fires.
    ///
    /// Peers are admitted through `connector`.
    async fn serve(
        &self,
        address: String,
        connector: Arc<dyn Connector>,
        stop: StopSignal,
    ) -> Result<(), ListenerError>;

    /// Get the listener name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// A running listener, owned by its address.
pub(crate) struct ListenerTask {
    address: String,
    stop: StopHandle,
    handle: JoinHandle<Result<(), ListenerError>>,
}

impl ListenerTask {
    /// Spawn `listener` for `address`.
    pub(crate) fn spawn(
        listener: Arc<dyn Listener>,
        address: &str,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (stop, signal) = StopSignal::pair();
        let name = address.to_string();
        debug!(address = %name, listener = listener.name(), "Spawning listener");

        let handle = tokio::spawn(async move { listener.serve(name, connector, signal).await });
        Self {
            address: address.to_string(),
            stop,
            handle,
        }
    }

    /// Signal the listener and wait for it to finish.
    ///
    /// Failures are logged, never propagated.
    pub(crate) async fn shutdown(self) {
        drop(self.stop);
        match self.handle.await {
            Ok(Ok(())) => debug!(address = %self.address, "Listener stopped"),
            Ok(Err(e)) => warn!(address = %self.address, error = %e, "Listener failed"),
            Err(e) => warn!(address = %self.address, error = %e, "Listener task panicked"),
        }
    }
}
