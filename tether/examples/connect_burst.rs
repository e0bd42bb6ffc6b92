//! Fire a burst of connects at one target and report how they resolved.
//!
//! Run this example:
//! ```bash
//! RUST_LOG=tether_core=debug cargo run --example connect_burst -- 127.0.0.1 8080 100
//! ```

use std::env;
use std::time::{Duration, Instant};

use tether::{Connector, ConnectorOptions, FailureKind};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tether::dev_tracing::init_tracing();

    let mut args = env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(8080);
    let count: usize = args.next().map(|n| n.parse()).transpose()?.unwrap_or(100);

    let connector = Connector::with_options(ConnectorOptions::default().with_tcp_nodelay(true));
    connector.start()?;

    let (tx, rx) = flume::unbounded();
    let started = Instant::now();
    for _ in 0..count {
        let ok = tx.clone();
        let failed = tx.clone();
        connector.connect_async(
            address.as_str(),
            port,
            Duration::from_secs(3),
            move |_stream| {
                let _ = ok.send(None);
            },
            move |err| {
                let _ = failed.send(Some(err.kind()));
            },
        )?;
    }
    drop(tx);

    let mut connected = 0;
    let mut refused = 0;
    let mut timed_out = 0;
    for outcome in rx.iter() {
        match outcome {
            None => connected += 1,
            Some(FailureKind::Timeout) => timed_out += 1,
            Some(_) => refused += 1,
        }
    }

    info!(?started, "burst finished");
    println!(
        "{count} connects to {address}:{port} in {:?}: {connected} connected, {refused} failed, {timed_out} timed out",
        started.elapsed()
    );

    connector.stop();
    Ok(())
}
