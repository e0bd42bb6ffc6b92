//! Minimal TCP relay: every accepted client gets a backend connection opened
//! through the connector, then bytes are copied both ways.
//!
//! Run this example:
//! ```bash
//! cargo run --example backend_proxy -- 9000 127.0.0.1 8080
//! ```

use std::env;
use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use tether::Connector;
use tracing::{info, warn};

fn pipe(mut from: TcpStream, mut to: TcpStream) {
    let _ = io::copy(&mut from, &mut to);
    let _ = to.shutdown(Shutdown::Write);
}

fn relay(client: TcpStream, backend: TcpStream) -> io::Result<()> {
    // Connector hands sockets over non-blocking; the relay uses blocking copies.
    backend.set_nonblocking(false)?;

    let client_rx = client.try_clone()?;
    let backend_tx = backend.try_clone()?;
    thread::spawn(move || pipe(client_rx, backend_tx));
    thread::spawn(move || pipe(backend, client));
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = env::args().skip(1);
    let (Some(listen_port), Some(backend_ip), Some(backend_port)) =
        (args.next(), args.next(), args.next())
    else {
        eprintln!("Usage: backend_proxy <listen port> <backend ip> <backend port>");
        std::process::exit(2);
    };
    let backend_port: u16 = backend_port.parse()?;

    let connector = Connector::create();
    connector.start()?;

    let listener = TcpListener::bind(("0.0.0.0", listen_port.parse::<u16>()?))?;
    info!("Relaying {} -> {}:{}", listener.local_addr()?, backend_ip, backend_port);

    for client in listener.incoming() {
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let peer = client.peer_addr().ok();
        let submitted = connector.connect_async(
            backend_ip.as_str(),
            backend_port,
            Duration::from_secs(5),
            move |backend| {
                if let Err(e) = relay(client, backend) {
                    warn!("relay setup failed: {}", e);
                }
            },
            move |err| warn!(?peer, "backend connect failed: {}", err),
        );
        if let Err(e) = submitted {
            warn!("connector rejected request: {}", e);
        }
    }

    Ok(())
}
