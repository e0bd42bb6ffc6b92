//! Connect throughput: how fast can one dispatcher establish loopback
//! connections?

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether::{Connector, ConnectorOptions};

const BURSTS: &[usize] = &[1, 64, 256];

fn loopback_connect_burst(c: &mut Criterion) {
    tether::dev_tracing::init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            drop(stream);
        }
    });

    let connector = Connector::with_options(ConnectorOptions::default().with_event_capacity(1024));
    connector.start().unwrap();

    let mut group = c.benchmark_group("connect/loopback");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for &burst in BURSTS {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::new("burst", burst), &burst, |b, &burst| {
            b.iter(|| {
                let pending: Vec<_> = (0..burst)
                    .map(|_| {
                        connector
                            .connect("127.0.0.1", port, Duration::from_secs(5))
                            .unwrap()
                    })
                    .collect();
                for p in pending {
                    p.wait().unwrap();
                }
            });
        });
    }
    group.finish();
    connector.stop();
}

criterion_group!(benches, loopback_connect_burst);
criterion_main!(benches);
