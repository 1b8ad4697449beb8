//! Broker instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const PEERS_CONNECTED_TOTAL: &str = "switchyard_peers_connected_total";
    pub const PEERS_ACTIVE: &str = "switchyard_peers_active";
    pub const CONNECT_REJECTED_TOTAL: &str = "switchyard_connect_rejected_total";
    pub const MESSAGES_TOTAL: &str = "switchyard_messages_total";
    pub const REGISTRATIONS_TOTAL: &str = "switchyard_registrations_total";
}

/// Describe all broker metrics to the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::PEERS_CONNECTED_TOTAL,
        "Total number of peers admitted since start"
    );
    metrics::describe_gauge!(names::PEERS_ACTIVE, "Current number of connected peers");
    metrics::describe_counter!(
        names::CONNECT_REJECTED_TOTAL,
        "Connection attempts refused by the broker"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Messages routed by the broker");
    metrics::describe_counter!(
        names::REGISTRATIONS_TOTAL,
        "Producer and consumer registrations"
    );
}

/// Record an admitted peer.
pub fn record_peer_connected() {
    counter!(names::PEERS_CONNECTED_TOTAL).increment(1);
    gauge!(names::PEERS_ACTIVE).increment(1.0);
}

/// Record a removed peer.
pub fn record_peer_disconnected() {
    gauge!(names::PEERS_ACTIVE).decrement(1.0);
}

/// Record a refused connection attempt.
pub fn record_connect_rejected(reason: &'static str) {
    counter!(names::CONNECT_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a routed message.
///
/// `direction` is `"broadcast"` for producer to peers and `"fan_in"` for
/// peers to consumers.
pub fn record_message(direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
}

/// Record a producer or consumer registration.
pub fn record_registration(kind: &'static str) {
    counter!(names::REGISTRATIONS_TOTAL, "kind" => kind).increment(1);
}
