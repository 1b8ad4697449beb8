//! In-process routing benchmarks for Switchyard.
//!
//! Everything runs through a real broker; no sockets are involved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::{Duration, Instant};
use switchyard_core::{Broker, BrokerConfig};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::new().expect("failed to build runtime")
}

/// Broadcast from one producer to many peers.
fn bench_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanout");

    for peers in [1, 10, 100, 1000] {
        group.throughput(Throughput::Elements(peers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(peers), &peers, |b, &peers| {
            b.iter_custom(|iters| rt.block_on(broadcast(peers, iters, 1)));
        });
    }

    group.finish();
}

/// Same broadcast with deeper channels.
fn bench_fanout_buffered(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanout_buffered");

    for capacity in [1, 64, 1024] {
        group.throughput(Throughput::Elements(100));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter_custom(|iters| rt.block_on(broadcast(100, iters, capacity)));
            },
        );
    }

    group.finish();
}

async fn broadcast(peers: usize, iters: u64, capacity: usize) -> Duration {
    let broker = Broker::with_config(BrokerConfig {
        channel_capacity: capacity,
    });
    let (producer, _stop) = broker.register_producer("bench", "fanout");
    broker.start();

    let readers: Vec<_> = (0..peers)
        .map(|_| {
            let mut peer = broker.connect("bench", "fanout").expect("connect failed");
            tokio::spawn(async move {
                for _ in 0..iters {
                    if peer.read.recv().await.is_none() {
                        break;
                    }
                }
            })
        })
        .collect();

    let message = "x".repeat(64);
    let start = Instant::now();
    for _ in 0..iters {
        producer
            .send(black_box(message.clone()))
            .await
            .expect("producer closed");
    }
    for reader in readers {
        reader.await.expect("reader panicked");
    }
    let elapsed = start.elapsed();

    broker.shutdown().await;
    elapsed
}

/// Many peers writing into one consumer.
fn bench_fanin(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanin");

    for peers in [1, 10, 100] {
        group.throughput(Throughput::Elements(peers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(peers), &peers, |b, &peers| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let broker = Broker::new();
                    let mut consumer = broker.register_consumer("bench", "fanin");
                    broker.start();

                    let channels: Vec<_> = (0..peers)
                        .map(|_| broker.connect("bench", "fanin").expect("connect failed"))
                        .collect();

                    let start = Instant::now();
                    let writers: Vec<_> = channels
                        .into_iter()
                        .map(|peer| {
                            tokio::spawn(async move {
                                let message = "x".repeat(64);
                                for _ in 0..iters {
                                    if peer.write.send(message.clone()).await.is_err() {
                                        break;
                                    }
                                }
                                // Stay connected until everything has been read.
                                peer
                            })
                        })
                        .collect();

                    for _ in 0..iters * peers as u64 {
                        black_box(consumer.recv().await);
                    }
                    let elapsed = start.elapsed();

                    for writer in writers {
                        drop(writer.await.expect("writer panicked"));
                    }
                    broker.shutdown().await;
                    elapsed
                })
            });
        });
    }

    group.finish();
}

/// Admission cost.
fn bench_connect(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("connect");

    group.bench_function("admit_and_leave", |b| {
        let broker = Broker::new();
        broker.register_consumer("bench", "connect");
        {
            // Admission spawns the peer's forwarding task.
            let _guard = rt.enter();
            broker.start();

            b.iter(|| {
                let peer = broker.connect("bench", "connect").expect("connect failed");
                black_box(peer.id);
            });
        }

        rt.block_on(broker.shutdown());
    });

    group.bench_function("unknown_endpoint", |b| {
        let broker = Broker::new();
        b.iter(|| black_box(broker.connect("bench", "missing").is_err()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fanout,
    bench_fanout_buffered,
    bench_fanin,
    bench_connect,
);
criterion_main!(benches);
