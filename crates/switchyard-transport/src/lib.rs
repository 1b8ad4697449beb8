//! # switchyard-transport
//!
//! WebSocket bridge between remote peers and a Switchyard broker.
//!
//! - **session** - Pumps one upgraded socket to and from a peer's channels
//! - **websocket** - axum routes and the per-address [`WebSocketListener`]
//!
//! ```rust,ignore
//! use switchyard_core::{Broker, BrokerConfig};
//! use switchyard_transport::{WebSocketConfig, WebSocketListener};
//!
//! let broker = Broker::with_listener(
//!     BrokerConfig::default(),
//!     WebSocketListener::new(WebSocketConfig::default()),
//! );
//! let (producer, stop) = broker.register_producer("127.0.0.1:8080", "feed");
//! broker.start();
//! // Peers connect to ws://127.0.0.1:8080/ws/feed
//! ```

pub mod session;
pub mod websocket;

pub use session::{bridge_session, SessionEnd, TransportError};
pub use websocket::{router, WebSocketConfig, WebSocketListener};
