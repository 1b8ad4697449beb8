//! Echo relays.
//!
//! Each relayed endpoint gets one consumer and one producer. Whatever a peer
//! sends is fed straight back into the producer, so it reaches every peer on
//! the endpoint, the sender included.

use crate::config::AddressSection;
use switchyard_core::{Broker, StopSignal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Register a relay for every configured endpoint.
///
/// The relays run until the broker shuts down.
pub fn spawn_relays(broker: &Broker, addresses: &[AddressSection]) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for address in addresses {
        for endpoint in &address.endpoints {
            let consumer = broker.register_consumer(&address.name, endpoint);
            let (producer, stop) = broker.register_producer(&address.name, endpoint);
            info!(address = %address.name, endpoint = %endpoint, "Relaying endpoint");

            let (address, endpoint) = (address.name.clone(), endpoint.clone());
            handles.push(tokio::spawn(async move {
                let relayed = relay(consumer, producer, stop).await;
                debug!(address = %address, endpoint = %endpoint, relayed, "Relay stopped");
            }));
        }
    }
    handles
}

/// Forward consumer messages into the producer until stopped.
///
/// Returns the number of messages relayed.
async fn relay(
    mut consumer: mpsc::Receiver<String>,
    producer: mpsc::Sender<String>,
    mut stop: StopSignal,
) -> u64 {
    let mut relayed = 0;
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            msg = consumer.recv() => {
                let Some(msg) = msg else { break };
                trace!(len = msg.len(), "Relaying message");
                tokio::select! {
                    _ = stop.stopped() => break,
                    res = producer.send(msg) => {
                        if res.is_err() {
                            break;
                        }
                        relayed += 1;
                    }
                }
            }
        }
    }
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn section(name: &str, endpoints: &[&str]) -> AddressSection {
        AddressSection {
            name: name.to_string(),
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_relay_registers_endpoints() {
        let broker = Broker::new();
        let handles = spawn_relays(
            &broker,
            &[section("a", &["x", "y"]), section("b", &["z"])],
        );
        assert_eq!(handles.len(), 3);

        let stats = broker.stats();
        assert_eq!(stats.address_count, 2);
        assert_eq!(stats.endpoint_count, 3);
        assert_eq!(stats.producer_count, 3);
        assert_eq!(stats.consumer_count, 3);

        broker.shutdown().await;
        for handle in handles {
            timeout(WAIT, handle).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_relay_echoes_to_every_peer() {
        let broker = Broker::new();
        let handles = spawn_relays(&broker, &[section("addr", &["chat"])]);
        broker.start();

        let sender = broker.connect("addr", "chat").unwrap();
        let mut other = broker.connect("addr", "chat").unwrap();
        let mut sender_read = sender.read;

        sender.write.send("hi all".to_string()).await.unwrap();

        let (a, b) = tokio::join!(sender_read.recv(), other.read.recv());
        assert_eq!(a.as_deref(), Some("hi all"));
        assert_eq!(b.as_deref(), Some("hi all"));

        timeout(WAIT, broker.shutdown()).await.unwrap();
        for handle in handles {
            timeout(WAIT, handle).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_relay_stops_when_signalled() {
        let broker = Broker::new();
        let consumer = broker.register_consumer("addr", "ep");
        let (producer, stop) = broker.register_producer("addr", "ep");

        let task = tokio::spawn(relay(consumer, producer, stop));
        broker.shutdown().await;

        let relayed = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(relayed, 0);
    }
}
