//! Channel-backed completion handle.
//!
//! [`PendingConnect`] turns the callback pair of a request into a one-shot
//! channel, so a caller can block on the outcome or `.await` it.

use std::net::TcpStream;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, TryRecvError};
use tether_core::error::ConnectError;
use tether_core::request::ConnectRequest;

type Outcome = Result<TcpStream, ConnectError>;

/// Outcome of a submitted connect, delivered exactly once.
///
/// Once the outcome has been taken, or if the connector dropped the request
/// without resolving it, every further query reports [`ConnectError::Aborted`].
#[derive(Debug)]
pub struct PendingConnect {
    rx: Receiver<Outcome>,
}

impl PendingConnect {
    /// Wire a request's callbacks to a fresh completion handle.
    pub(crate) fn wire(request: ConnectRequest) -> (ConnectRequest, Self) {
        let (tx, rx) = flume::bounded(1);
        let on_err = tx.clone();
        let request = request
            .on_success(move |stream| {
                let _ = tx.send(Ok(stream));
            })
            .on_failure(move |err| {
                let _ = on_err.send(Err(err));
            });
        (request, Self { rx })
    }

    /// Block until the attempt resolves.
    pub fn wait(self) -> Outcome {
        self.rx.recv().unwrap_or(Err(ConnectError::Aborted))
    }

    /// Block for at most `timeout`. Returns `None` if still unresolved.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ConnectError::Aborted)),
        }
    }

    /// Take the outcome if the attempt has already resolved.
    pub fn try_result(&self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ConnectError::Aborted)),
        }
    }

    /// Wait for the outcome asynchronously. Runtime-agnostic.
    pub async fn resolved(self) -> Outcome {
        self.rx
            .recv_async()
            .await
            .unwrap_or(Err(ConnectError::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::request::ConnectRequest;

    #[test]
    fn test_failure_delivered_once() {
        let request = ConnectRequest::new("127.0.0.1", 1, Duration::from_secs(1));
        let (request, pending) = PendingConnect::wire(request);
        assert!(pending.try_result().is_none());

        let (_, _, _, callbacks) = request.into_parts().unwrap();
        callbacks.fail(ConnectError::Timeout(Duration::from_secs(1)));

        assert!(matches!(
            pending.wait_timeout(Duration::from_millis(10)),
            Some(Err(ConnectError::Timeout(_)))
        ));
        // Both senders are gone once the callback pair is consumed.
        assert!(matches!(pending.wait(), Err(ConnectError::Aborted)));
    }

    #[test]
    fn test_dropped_request_reports_aborted() {
        let request = ConnectRequest::new("127.0.0.1", 1, Duration::from_secs(1));
        let (request, pending) = PendingConnect::wire(request);
        drop(request);
        assert!(matches!(pending.try_result(), Some(Err(ConnectError::Aborted))));
    }
}
