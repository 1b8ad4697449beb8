//! # switchyard-core
//!
//! Broker engine bridging in-process producers and consumers with remote
//! peers that connect and disconnect at runtime.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Address and endpoint bookkeeping, created lazily
//! - **Endpoint** - Per-endpoint fan-in and broadcast routing loops
//! - **Peer** - Connected remote participants and their disconnect path
//! - **Broker** - The start/shutdown state machine tying it all together
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌─────────────────┐     ┌─────────┐
//! │ Producers │────▶│    Endpoint     │────▶│  Peers  │
//! └───────────┘     │ (fan-in / fan-  │     └─────────┘
//! ┌───────────┐     │  out loops)     │          │
//! │ Consumers │◀────│                 │◀─────────┘
//! └───────────┘     └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use switchyard_core::Broker;
//!
//! # async fn run() -> Result<(), switchyard_core::BrokerError> {
//! let broker = Broker::new();
//! let (producer, _stop) = broker.register_producer("127.0.0.1:8080", "feed");
//! broker.start();
//!
//! let mut peer = broker.connect("127.0.0.1:8080", "feed")?;
//! producer.send("hello world".to_string()).await.ok();
//! assert_eq!(peer.read.recv().await.as_deref(), Some("hello world"));
//!
//! broker.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod listener;
pub mod metrics;
pub mod peer;
pub mod signal;

mod endpoint;
mod registry;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerStats, BrokerStatus, Connector};
pub use listener::{Listener, ListenerError};
pub use peer::{PeerChannels, PeerId};
pub use signal::StopSignal;
