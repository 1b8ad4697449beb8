//! Per-endpoint message routing.
//!
//! Every endpoint owns two fan-in channels and runs the loops that move
//! messages between producers, peers and consumers:
//!
//! ```text
//! producer ──forward──┐                         ┌──▶ peer.read
//! producer ──forward──┼─▶ producer fan-in ─▶ broadcast ──▶ peer.read
//!                     ┘                         └──▶ peer.read
//!
//! peer.write ──forward──┐                        ┌──▶ consumer
//! peer.write ──forward──┼─▶ peer fan-in ─▶ fan-in loop ──▶ consumer
//! ```
//!
//! Deliveries are awaited one target at a time, so a stalled peer or
//! consumer holds up the rest of its pass.

use crate::metrics;
use crate::peer::{PeerChannels, PeerId, PeerSlot, PeerTarget};
use crate::signal::{StopHandle, StopSignal};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Routing phase of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Registered, loops not running yet.
    Idle,
    /// Loops running.
    Routing,
    /// Shut down; admits nothing.
    Closed,
}

/// A registered producer.
struct ProducerSlot {
    /// The producer's message stream, until a forwarder picks it up.
    pending: Option<mpsc::Receiver<String>>,
    /// Dropped on shutdown to notify the producer.
    stop: Option<StopHandle>,
}

struct EndpointState {
    phase: Phase,
    consumers: Vec<mpsc::Sender<String>>,
    producers: Vec<ProducerSlot>,
    peers: HashMap<PeerId, PeerSlot>,
    producer_tx: Option<mpsc::Sender<String>>,
    producer_rx: Option<mpsc::Receiver<String>>,
    peer_tx: Option<mpsc::Sender<String>>,
    peer_rx: Option<mpsc::Receiver<String>>,
    halt: Option<StopHandle>,
}

/// The unit of message routing.
pub(crate) struct Endpoint {
    address: String,
    name: String,
    capacity: usize,
    /// Fires on shutdown.
    halted: StopSignal,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    /// Create an idle endpoint. `capacity` applies to every channel it makes.
    pub(crate) fn new(address: impl Into<String>, name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (producer_tx, producer_rx) = mpsc::channel(capacity);
        let (peer_tx, peer_rx) = mpsc::channel(capacity);
        let (halt, halted) = StopSignal::pair();

        Self {
            address: address.into(),
            name: name.into(),
            capacity,
            halted,
            state: Mutex::new(EndpointState {
                phase: Phase::Idle,
                consumers: Vec::new(),
                producers: Vec::new(),
                peers: HashMap::new(),
                producer_tx: Some(producer_tx),
                producer_rx: Some(producer_rx),
                peer_tx: Some(peer_tx),
                peer_rx: Some(peer_rx),
                halt: Some(halt),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a consumer and return its inbound channel.
    pub(crate) fn add_consumer(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().consumers.push(tx);
        rx
    }

    /// Register a producer and return its outbound channel and stop signal.
    ///
    /// On a routing endpoint the producer's forwarder starts right away; on a
    /// closed one the stop signal has already fired.
    pub(crate) fn add_producer(self: &Arc<Self>) -> (mpsc::Sender<String>, StopSignal) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.lock();

        let (stop, signal) = match state.phase {
            Phase::Closed => return (tx, StopSignal::closed()),
            Phase::Idle | Phase::Routing => StopSignal::pair(),
        };

        let forward = if state.phase == Phase::Routing {
            state.producers.push(ProducerSlot {
                pending: None,
                stop: Some(stop),
            });
            state.producer_tx.clone().map(|fan_in| (rx, fan_in))
        } else {
            state.producers.push(ProducerSlot {
                pending: Some(rx),
                stop: Some(stop),
            });
            None
        };
        drop(state);

        if let Some((rx, fan_in)) = forward {
            tokio::spawn(Arc::clone(self).forward_producer(rx, fan_in));
        }
        (tx, signal)
    }

    /// Start the broadcast and fan-in loops plus one forwarder per producer.
    ///
    /// Does nothing unless the endpoint is idle.
    pub(crate) fn start_routing(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            return;
        }
        let (Some(producer_rx), Some(peer_rx), Some(producer_tx)) = (
            state.producer_rx.take(),
            state.peer_rx.take(),
            state.producer_tx.clone(),
        ) else {
            return;
        };
        state.phase = Phase::Routing;
        let pending: Vec<_> = state
            .producers
            .iter_mut()
            .filter_map(|p| p.pending.take())
            .collect();
        drop(state);

        let producers = pending.len();
        for rx in pending {
            tokio::spawn(Arc::clone(self).forward_producer(rx, producer_tx.clone()));
        }
        tokio::spawn(Arc::clone(self).broadcast_loop(producer_rx));
        tokio::spawn(Arc::clone(self).fan_in_loop(peer_rx));

        debug!(
            address = %self.address,
            endpoint = %self.name,
            producers,
            "Endpoint routing started"
        );
    }

    /// Admit a new peer and start its forwarding task.
    ///
    /// Returns `None` once the endpoint is closed.
    pub(crate) fn admit(self: &Arc<Self>) -> Option<PeerChannels> {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return None;
        }
        let fan_in = state.peer_tx.clone()?;
        let (slot, channels, inbound) = PeerSlot::open(self.capacity);
        let departed = slot.departed();
        state.peers.insert(channels.id, slot);
        let peers = state.peers.len();
        drop(state);

        metrics::record_peer_connected();
        debug!(
            address = %self.address,
            endpoint = %self.name,
            peer = %channels.id,
            peers,
            "Peer connected"
        );

        tokio::spawn(
            Arc::clone(self).forward_peer(channels.id, inbound, departed, fan_in),
        );
        Some(channels)
    }

    /// Remove a peer and close its `read` channel.
    ///
    /// Returns `false` if the peer was already gone.
    pub(crate) fn disconnect(&self, id: PeerId) -> bool {
        let mut state = self.lock();
        let Some(slot) = state.peers.remove(&id) else {
            return false;
        };
        let peers = state.peers.len();
        drop(state);
        drop(slot);

        metrics::record_peer_disconnected();
        debug!(
            address = %self.address,
            endpoint = %self.name,
            peer = %id,
            peers,
            "Peer disconnected"
        );
        true
    }

    /// Close the endpoint: disconnect every peer, notify every producer and
    /// halt the fan-in loop. Idempotent.
    pub(crate) fn shutdown(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return;
        }
        state.phase = Phase::Closed;

        let peers: Vec<PeerId> = state.peers.keys().copied().collect();
        let mut stops = Vec::with_capacity(state.producers.len());
        for producer in &mut state.producers {
            producer.pending = None;
            stops.extend(producer.stop.take());
        }
        state.producer_tx = None;
        state.producer_rx = None;
        state.peer_tx = None;
        state.peer_rx = None;
        let halt = state.halt.take();
        drop(state);

        for id in peers {
            self.disconnect(id);
        }
        let producers = stops.len();
        drop(stops);
        drop(halt);

        debug!(
            address = %self.address,
            endpoint = %self.name,
            producers,
            "Endpoint shut down"
        );
    }

    /// Number of connected peers.
    pub(crate) fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    /// Number of registered producers.
    pub(crate) fn producer_count(&self) -> usize {
        self.lock().producers.len()
    }

    /// Number of registered consumers.
    pub(crate) fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    fn snapshot_peers(&self) -> Vec<PeerTarget> {
        self.lock()
            .peers
            .iter()
            .map(|(id, slot)| slot.target(*id))
            .collect()
    }

    async fn forward_producer(
        self: Arc<Self>,
        mut messages: mpsc::Receiver<String>,
        fan_in: mpsc::Sender<String>,
    ) {
        while let Some(msg) = messages.recv().await {
            if fan_in.send(msg).await.is_err() {
                break;
            }
        }
        trace!(address = %self.address, endpoint = %self.name, "Producer forwarder finished");
    }

    async fn forward_peer(
        self: Arc<Self>,
        id: PeerId,
        mut inbound: mpsc::Receiver<String>,
        mut departed: StopSignal,
        fan_in: mpsc::Sender<String>,
    ) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = departed.stopped() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let sent = tokio::select! {
                biased;
                _ = departed.stopped() => break,
                sent = fan_in.send(msg) => sent,
            };
            if sent.is_err() {
                break;
            }
        }
        self.disconnect(id);
    }

    async fn broadcast_loop(self: Arc<Self>, mut fan_in: mpsc::Receiver<String>) {
        while let Some(msg) = fan_in.recv().await {
            let targets = self.snapshot_peers();
            trace!(
                address = %self.address,
                endpoint = %self.name,
                peers = targets.len(),
                "Broadcasting message"
            );
            for target in targets {
                deliver(target, &msg).await;
            }
            metrics::record_message("broadcast");
        }

        // Every producer sender is gone: close whoever is still attached.
        let remaining: Vec<PeerId> = self.lock().peers.keys().copied().collect();
        for id in remaining {
            self.disconnect(id);
        }
        debug!(address = %self.address, endpoint = %self.name, "Broadcast loop finished");
    }

    async fn fan_in_loop(self: Arc<Self>, mut fan_in: mpsc::Receiver<String>) {
        let mut halted = self.halted.clone();
        'messages: loop {
            let msg = tokio::select! {
                biased;
                _ = halted.stopped() => break,
                msg = fan_in.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let consumers = self.lock().consumers.clone();
            trace!(
                address = %self.address,
                endpoint = %self.name,
                consumers = consumers.len(),
                "Delivering to consumers"
            );
            for consumer in &consumers {
                tokio::select! {
                    biased;
                    _ = halted.stopped() => break 'messages,
                    sent = consumer.send(msg.clone()) => {
                        if sent.is_err() {
                            trace!(endpoint = %self.name, "Consumer receiver dropped");
                        }
                    }
                }
            }
            metrics::record_message("fan_in");
        }
        debug!(address = %self.address, endpoint = %self.name, "Fan-in loop finished");
    }
}

/// Send one message to one peer, giving up if the peer departs first.
async fn deliver(mut target: PeerTarget, msg: &str) {
    // The strong sender lives only as long as this send.
    let Some(outbound) = target.outbound.upgrade() else {
        trace!(peer = %target.id, "Skipped removed peer");
        return;
    };
    tokio::select! {
        biased;
        _ = target.departed.stopped() => {
            trace!(peer = %target.id, "Skipped departed peer");
        }
        sent = outbound.send(msg.to_owned()) => {
            if sent.is_err() {
                trace!(peer = %target.id, "Peer read half dropped");
            }
        }
    }
}
