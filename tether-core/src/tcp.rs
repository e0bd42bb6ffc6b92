//! Socket primitives for non-blocking outbound TCP.
//!
//! Creation and the three-way connect go through `socket2`; readiness
//! registration needs the `mio` wrapper, and hand-off converts back to a
//! plain `std::net::TcpStream`.
//!
//! # Safety
//!
//! Converting a `mio` stream back into a `std` stream moves the raw
//! descriptor between owners. The descriptor is never duplicated or used after
//! the move, so exactly one owner closes it.

#![allow(unsafe_code)]

use std::io;
use std::net::{SocketAddr, TcpStream};

use socket2::{Domain, Protocol, Socket, Type};

/// Result of issuing a non-blocking `connect`.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// The OS completed the handshake inside the `connect` call.
    Connected(TcpStream),
    /// Handshake is under way; wait for write readiness.
    InProgress(TcpStream),
    /// Socket creation or `connect` was rejected. Any descriptor is closed.
    Failed(io::Error),
}

/// Result of probing a socket that was reported writable.
#[derive(Debug)]
pub enum Probe {
    /// Connection established.
    Connected,
    /// Readiness was spurious; keep waiting.
    Pending,
    /// Connection failed with the socket's pending error.
    Failed(io::Error),
}

/// Create a non-blocking stream socket for `addr` and issue `connect`.
pub fn start_connect(addr: SocketAddr) -> ConnectOutcome {
    let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) => socket,
        Err(e) => return ConnectOutcome::Failed(e),
    };

    // Dropping `socket` on any early return closes the descriptor.
    if let Err(e) = socket.set_nonblocking(true) {
        return ConnectOutcome::Failed(e);
    }

    match socket.connect(&addr.into()) {
        Ok(()) => ConnectOutcome::Connected(socket.into()),
        Err(e) if is_in_progress(&e) => ConnectOutcome::InProgress(socket.into()),
        Err(e) => ConnectOutcome::Failed(e),
    }
}

fn is_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::EINPROGRESS) {
            return true;
        }
    }

    // Windows reports WSAEWOULDBLOCK; EINTR leaves the connect running.
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read the pending socket error to tell success from failure.
pub fn probe(stream: &mio::net::TcpStream) -> Probe {
    match stream.take_error() {
        Ok(Some(e)) | Err(e) => Probe::Failed(e),
        Ok(None) => match stream.peer_addr() {
            Ok(_) => Probe::Connected,
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Probe::Pending,
            Err(e) => Probe::Failed(e),
        },
    }
}

/// Convert a registered stream back into a `std` stream for hand-off.
pub fn into_std(stream: mio::net::TcpStream) -> TcpStream {
    #[cfg(unix)]
    {
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        let fd = stream.into_raw_fd();
        unsafe { TcpStream::from_raw_fd(fd) }
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{FromRawSocket, IntoRawSocket};
        let raw = stream.into_raw_socket();
        unsafe { TcpStream::from_raw_socket(raw) }
    }
}

/// Apply hand-off socket options. The stream stays non-blocking.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn prepare_handoff(stream: &TcpStream, nodelay: bool) -> io::Result<()> {
    if nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(())
}
