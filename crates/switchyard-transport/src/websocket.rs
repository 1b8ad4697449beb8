//! WebSocket listener built on axum.
//!
//! Each broker address gets its own HTTP server. A peer connects to
//! `ws://<address><websocket_path>/<endpoint>`; the endpoint segment selects
//! which endpoint of that address it joins.

use crate::session::bridge_session;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use switchyard_core::{Connector, Listener, ListenerError, StopSignal};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Path prefix under which endpoints are served.
    pub websocket_path: String,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// Shared handler state for one address.
struct AddressState {
    address: String,
    connector: Arc<dyn Connector>,
    config: WebSocketConfig,
}

/// Build the HTTP routes for one address.
pub fn router(
    address: impl Into<String>,
    connector: Arc<dyn Connector>,
    config: WebSocketConfig,
) -> Router {
    let path = format!("{}/:endpoint", config.websocket_path.trim_end_matches('/'));
    let state = Arc::new(AddressState {
        address: address.into(),
        connector,
        config,
    });

    Router::new()
        .route(&path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// The peer is admitted before the upgrade so a refusal can still be
/// answered with a plain HTTP error.
async fn ws_handler(
    Path(endpoint): Path<String>,
    State(state): State<Arc<AddressState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(
                address = %state.address,
                endpoint = %endpoint,
                reason = %rejection.body_text(),
                "Rejected non-WebSocket request"
            );
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    let channels = match state.connector.connect(&state.address, &endpoint) {
        Ok(channels) => channels,
        Err(e) => {
            debug!(address = %state.address, endpoint = %endpoint, error = %e, "Connect refused");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let peer = channels.id;
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match bridge_session(socket, channels).await {
                Ok(end) => debug!(peer = %peer, reason = ?end, "Session ended"),
                Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
            }
        })
}

/// Serves every broker address over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketListener {
    config: WebSocketConfig,
}

impl WebSocketListener {
    /// Create a listener with the given configuration.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Listener for WebSocketListener {
    async fn serve(
        &self,
        address: String,
        connector: Arc<dyn Connector>,
        mut stop: StopSignal,
    ) -> Result<(), ListenerError> {
        let listener = TcpListener::bind(address.as_str())
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        info!(
            "WebSocket endpoints for {} at ws://{}{}/<endpoint>",
            address,
            listener.local_addr()?,
            self.config.websocket_path.trim_end_matches('/')
        );

        let app = router(address.clone(), connector, self.config.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.stopped().await })
            .await?;

        info!(address = %address, "WebSocket listener stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
