//! Remote peers attached to an endpoint.
//!
//! A peer is admitted by [`Broker::connect`](crate::Broker::connect) and is
//! removed exactly once, either when its `write` channel closes or when the
//! broker shuts down.

use crate::signal::{StopHandle, StopSignal};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Process-wide counter so ids stay unique across broker instances.
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Allocate a fresh peer id.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value of the id.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// The caller's ends of a connected peer.
///
/// `read` yields every message broadcast on the endpoint and closes when the
/// broker removes the peer. Messages sent on `write` are delivered to every
/// consumer of the endpoint; dropping `write` disconnects the peer.
#[derive(Debug)]
pub struct PeerChannels {
    /// Identifier assigned at admission.
    pub id: PeerId,
    /// Broker to peer.
    pub read: mpsc::Receiver<String>,
    /// Peer to broker.
    pub write: mpsc::Sender<String>,
}

/// The endpoint's half of a peer, held in its peer table.
#[derive(Debug)]
pub(crate) struct PeerSlot {
    outbound: mpsc::Sender<String>,
    departed: StopSignal,
    // Dropped together with the slot, which fires `departed`.
    _departure: StopHandle,
}

/// A point-in-time copy of a peer used for one broadcast pass.
///
/// Holds only a weak sender, so removing the peer closes its `read` even
/// while a pass still has it queued.
pub(crate) struct PeerTarget {
    pub id: PeerId,
    pub outbound: mpsc::WeakSender<String>,
    pub departed: StopSignal,
}

impl PeerSlot {
    /// Create the endpoint slot together with the caller-facing channels.
    ///
    /// The returned receiver is the inbound side of `write`, to be drained by
    /// the peer's forwarding task.
    pub(crate) fn open(capacity: usize) -> (Self, PeerChannels, mpsc::Receiver<String>) {
        let id = PeerId::generate();
        let (outbound, read) = mpsc::channel(capacity);
        let (write, inbound) = mpsc::channel(capacity);
        let (departure, departed) = StopSignal::pair();

        let slot = Self {
            outbound,
            departed,
            _departure: departure,
        };
        (slot, PeerChannels { id, read, write }, inbound)
    }

    pub(crate) fn departed(&self) -> StopSignal {
        self.departed.clone()
    }

    pub(crate) fn target(&self, id: PeerId) -> PeerTarget {
        PeerTarget {
            id,
            outbound: self.outbound.downgrade(),
            departed: self.departed.clone(),
        }
    }
}
