/// Tether Error Types
///
/// Every way a connect request can be rejected or resolved unsuccessfully.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed or rejected connect request.
///
/// Mirrors the variants of [`ConnectError`] without their payloads so callers
/// can match on the outcome alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Request rejected at submission (missing callback).
    InvalidArgument,
    /// Connector was not running when the request was submitted.
    NotRunning,
    /// OS descriptors for the connector could not be created.
    SocketCreateFailed,
    /// Socket creation or `connect` was rejected by the OS.
    ConnectFailed,
    /// The attempt did not complete within its timeout.
    Timeout,
    /// The connector was stopped while the attempt was in flight.
    Aborted,
}

/// Main error type for Tether operations
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Request rejected at submission time
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Connector worker thread is not running
    #[error("Connector is not running")]
    NotRunning,

    /// Poll instance or waker descriptor could not be created
    #[error("Socket create failed: {0}")]
    SocketCreateFailed(#[source] io::Error),

    /// Dispatcher thread could not be spawned
    #[error("Worker spawn failed: {0}")]
    WorkerSpawn(#[source] io::Error),

    /// Socket creation or connect rejected by the OS
    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// Attempt exceeded its timeout
    #[error("Connect timeout after {0:?}")]
    Timeout(Duration),

    /// Attempt resolved by connector shutdown
    #[error("Connect aborted by connector shutdown")]
    Aborted,
}

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, ConnectError>;

impl ConnectError {
    /// Classification of this error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidArgument(_) => FailureKind::InvalidArgument,
            Self::NotRunning => FailureKind::NotRunning,
            Self::SocketCreateFailed(_) | Self::WorkerSpawn(_) => FailureKind::SocketCreateFailed,
            Self::ConnectFailed(_) => FailureKind::ConnectFailed,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Aborted => FailureKind::Aborted,
        }
    }

    /// Check if this error was produced by the connect attempt itself
    /// rather than by submission or lifecycle.
    #[must_use]
    pub const fn is_connect_failure(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::Timeout(_))
    }

    /// Check if resubmitting the same request could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::ConnectFailed(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// The underlying OS error, if any.
    #[must_use]
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::SocketCreateFailed(e) | Self::WorkerSpawn(e) | Self::ConnectFailed(e) => Some(e),
            _ => None,
        }
    }
}
