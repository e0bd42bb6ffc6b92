//! Connection lifecycle monitoring.
//!
//! Provides an event stream for tracking outbound attempts as the dispatcher
//! starts and resolves them.

use std::fmt;
use std::net::SocketAddr;

use crate::error::FailureKind;

/// Lifecycle events of outbound connect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectEvent {
    /// A `connect` was issued to the address.
    Attempting(SocketAddr),

    /// The attempt completed and the socket was handed off.
    Connected(SocketAddr),

    /// The attempt resolved with a failure.
    Failed {
        addr: Option<SocketAddr>,
        kind: FailureKind,
    },
}

impl fmt::Display for ConnectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempting(addr) => write!(f, "Connecting to {addr}"),
            Self::Connected(addr) => write!(f, "Connected to {addr}"),
            Self::Failed {
                addr: Some(addr),
                kind,
            } => write!(f, "Connect to {addr} failed: {kind:?}"),
            Self::Failed { addr: None, kind } => write!(f, "Connect failed: {kind:?}"),
        }
    }
}

/// Handle for receiving connect events.
pub type ConnectMonitor = flume::Receiver<ConnectEvent>;

/// Sending side of the monitor channel.
pub type ConnectEventSender = flume::Sender<ConnectEvent>;

/// Creates a new monitoring channel pair.
///
/// Receivers are MPMC clones: each event is taken by exactly one of them.
#[must_use]
pub fn create_monitor() -> (ConnectEventSender, ConnectMonitor) {
    flume::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_event_display() {
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let event = ConnectEvent::Failed {
            addr: Some(addr),
            kind: FailureKind::Timeout,
        };
        assert_eq!(event.to_string(), "Connect to 127.0.0.1:5555 failed: Timeout");
    }

    #[test]
    fn test_clones_share_one_queue() {
        let (sender, receiver) = create_monitor();
        let other = receiver.clone();
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        sender.send(ConnectEvent::Attempting(addr)).unwrap();
        assert_eq!(other.try_recv().unwrap(), ConnectEvent::Attempting(addr));
        assert!(receiver.try_recv().is_err());

        drop((receiver, other));
        assert!(sender.send(ConnectEvent::Connected(addr)).is_err());
    }
}
