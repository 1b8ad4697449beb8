//! The broker and its lifecycle.
//!
//! A [`Broker`] moves through `NotStarted -> Running -> Closed` exactly once.
//! Registration works in any state; peers are only admitted while running.

use crate::endpoint::Endpoint;
use crate::listener::{Listener, ListenerTask};
use crate::metrics;
use crate::peer::PeerChannels;
use crate::registry::{Address, Registry};
use crate::signal::StopSignal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// No such address.
    #[error("Address not found: {0}")]
    AddressNotFound(String),

    /// No such endpoint under an existing address.
    #[error("Endpoint not found: {endpoint} on {address}")]
    EndpointNotFound {
        /// Address that was searched.
        address: String,
        /// Endpoint that was missing.
        endpoint: String,
    },

    /// The broker is not running.
    #[error("Broker is not accepting peers")]
    NotAccepting,
}

impl BrokerError {
    /// Whether this is one of the not-found errors.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::AddressNotFound(_) | BrokerError::EndpointNotFound { .. }
        )
    }
}

/// Broker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BrokerStatus {
    /// Accepting registrations, not peers.
    NotStarted,
    /// Routing and admitting peers.
    Running,
    /// Shut down for good.
    Closed,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of every channel the broker creates. Values below 1 are
    /// treated as 1.
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
        }
    }
}

/// Admits peers onto endpoints.
///
/// Implemented by [`Broker`]; transports depend on this trait alone.
pub trait Connector: Send + Sync {
    /// Connect a new peer to `endpoint` on `address`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown address or endpoint, and
    /// [`BrokerError::NotAccepting`] when the broker is not running.
    fn connect(&self, address: &str, endpoint: &str) -> Result<PeerChannels, BrokerError>;
}

struct Inner {
    config: BrokerConfig,
    registry: Registry,
    status: Mutex<BrokerStatus>,
    listener: Option<Arc<dyn Listener>>,
}

/// The message broker.
///
/// Cheap to clone; every clone drives the same broker.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    /// Create an in-process broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create an in-process broker with custom configuration.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a broker that serves every address through `listener`.
    #[must_use]
    pub fn with_listener(config: BrokerConfig, listener: impl Listener) -> Self {
        Self::build(config, Some(Arc::new(listener)))
    }

    fn build(config: BrokerConfig, listener: Option<Arc<dyn Listener>>) -> Self {
        info!("Creating broker with config: {:?}", config);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Registry::new(),
                status: Mutex::new(BrokerStatus::NotStarted),
                listener,
            }),
        }
    }

    fn status_lock(&self) -> MutexGuard<'_, BrokerStatus> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> BrokerStatus {
        *self.status_lock()
    }

    /// Register a producer on an endpoint, creating it if needed.
    ///
    /// Messages sent on the returned channel are broadcast to every peer on
    /// the endpoint. The [`StopSignal`] fires when the broker shuts down; the
    /// producer should then drop the sender.
    pub fn register_producer(
        &self,
        address: &str,
        endpoint: &str,
    ) -> (mpsc::Sender<String>, StopSignal) {
        let (entry, ep) = self.endpoint_or_insert(address, endpoint);
        let handle = ep.add_producer();
        metrics::record_registration("producer");
        debug!(address = %address, endpoint = %endpoint, "Registered producer");
        self.activate_if_running(&entry, &ep);
        handle
    }

    /// Register a consumer on an endpoint, creating it if needed.
    ///
    /// The returned channel receives every message sent by any peer on the
    /// endpoint. The broker never closes it.
    pub fn register_consumer(&self, address: &str, endpoint: &str) -> mpsc::Receiver<String> {
        let (entry, ep) = self.endpoint_or_insert(address, endpoint);
        let rx = ep.add_consumer();
        metrics::record_registration("consumer");
        debug!(address = %address, endpoint = %endpoint, "Registered consumer");
        self.activate_if_running(&entry, &ep);
        rx
    }

    fn endpoint_or_insert(&self, address: &str, endpoint: &str) -> (Arc<Address>, Arc<Endpoint>) {
        self.inner
            .registry
            .endpoint_or_insert(address, endpoint, self.inner.config.channel_capacity)
    }

    /// Bring a registration in line with the broker's state.
    ///
    /// Entries created after start go online; entries created after shutdown
    /// are closed at once, which fires any producer's stop signal.
    fn activate_if_running(&self, address: &Arc<Address>, endpoint: &Arc<Endpoint>) {
        let status = self.status_lock();
        match *status {
            BrokerStatus::NotStarted => {}
            BrokerStatus::Running => {
                endpoint.start_routing();
                self.ensure_listener(address);
            }
            BrokerStatus::Closed => endpoint.shutdown(),
        }
    }

    fn ensure_listener(&self, address: &Address) {
        let Some(listener) = &self.inner.listener else {
            return;
        };
        address.ensure_listener(|name| {
            let connector: Arc<dyn Connector> = Arc::new(self.clone());
            ListenerTask::spawn(Arc::clone(listener), name, connector)
        });
    }

    /// All address names, in no particular order.
    #[must_use]
    pub fn address_names(&self) -> Vec<String> {
        self.inner.registry.address_names()
    }

    /// All endpoint names of an address, in no particular order.
    ///
    /// Empty for an unknown address.
    #[must_use]
    pub fn endpoint_names(&self, address: &str) -> Vec<String> {
        self.inner
            .registry
            .address(address)
            .map(|a| a.endpoint_names())
            .unwrap_or_default()
    }

    /// Number of peers connected to an endpoint.
    #[must_use]
    pub fn peer_count(&self, address: &str, endpoint: &str) -> usize {
        self.inner
            .registry
            .lookup(address, endpoint)
            .map(|e| e.peer_count())
            .unwrap_or(0)
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let addresses = self.inner.registry.addresses();
        let mut stats = BrokerStats {
            address_count: addresses.len(),
            ..BrokerStats::default()
        };
        for endpoint in addresses.iter().flat_map(|a| a.endpoints()) {
            stats.endpoint_count += 1;
            stats.producer_count += endpoint.producer_count();
            stats.consumer_count += endpoint.consumer_count();
            stats.peer_count += endpoint.peer_count();
        }
        stats
    }

    /// Connect a new peer to an endpoint.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown address or endpoint, and
    /// [`BrokerError::NotAccepting`] unless the broker is running.
    pub fn connect(&self, address: &str, endpoint: &str) -> Result<PeerChannels, BrokerError> {
        let ep = self.inner.registry.lookup(address, endpoint).map_err(|e| {
            metrics::record_connect_rejected("not_found");
            e
        })?;

        // Held across admission so shutdown cannot slip in between.
        let status = self.status_lock();
        let admitted = match *status {
            BrokerStatus::Running => ep.admit(),
            BrokerStatus::NotStarted | BrokerStatus::Closed => None,
        };
        drop(status);

        admitted.ok_or_else(|| {
            metrics::record_connect_rejected("not_accepting");
            debug!(address = %address, endpoint = %endpoint, "Rejected peer: not accepting");
            BrokerError::NotAccepting
        })
    }

    /// Start routing and listening.
    ///
    /// Launches the routing loops of every endpoint and a listener per
    /// address. Does nothing unless the broker has never been started. Must
    /// be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut status = self.status_lock();
        if *status != BrokerStatus::NotStarted {
            debug!(status = ?*status, "Start ignored");
            return;
        }

        let addresses = self.inner.registry.addresses();
        for address in &addresses {
            for endpoint in address.endpoints() {
                endpoint.start_routing();
            }
            self.ensure_listener(address);
        }

        *status = BrokerStatus::Running;
        info!(addresses = addresses.len(), "Broker started");
    }

    /// Shut the broker down.
    ///
    /// Disconnects every peer, fires every producer's stop signal and stops
    /// every listener. Safe to call repeatedly and concurrently.
    pub async fn shutdown(&self) {
        {
            let mut status = self.status_lock();
            if *status == BrokerStatus::Closed {
                return;
            }
            *status = BrokerStatus::Closed;
        }

        let mut listeners = Vec::new();
        for address in self.inner.registry.addresses() {
            for endpoint in address.endpoints() {
                endpoint.shutdown();
            }
            listeners.extend(address.take_listener());
        }

        for listener in listeners {
            listener.shutdown().await;
        }
        info!("Broker shut down");
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("status", &self.status())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Connector for Broker {
    fn connect(&self, address: &str, endpoint: &str) -> Result<PeerChannels, BrokerError> {
        Broker::connect(self, address, endpoint)
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Number of addresses.
    pub address_count: usize,
    /// Number of endpoints across all addresses.
    pub endpoint_count: usize,
    /// Registered producers.
    pub producer_count: usize,
    /// Registered consumers.
    pub consumer_count: usize,
    /// Connected peers.
    pub peer_count: usize,
}
