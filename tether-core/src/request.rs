//! Connect request value type.
//!
//! A [`ConnectRequest`] describes one outbound attempt: where to connect, how
//! long to wait, and the two continuations that receive the outcome. Nothing
//! is validated at construction; the connector checks callbacks when the
//! request is submitted.

use std::fmt;
use std::net::TcpStream;
use std::time::Duration;

use crate::error::ConnectError;

/// Continuation receiving an established socket. Ownership passes to it.
pub type OnConnected = Box<dyn FnOnce(TcpStream) + Send + 'static>;

/// Continuation receiving the failure classification.
pub type OnFailed = Box<dyn FnOnce(ConnectError) + Send + 'static>;

/// One outbound connection attempt.
///
/// # Example
///
/// ```rust
/// use tether_core::request::ConnectRequest;
/// use std::time::Duration;
///
/// let request = ConnectRequest::new("127.0.0.1", 8080, Duration::from_secs(2))
///     .on_success(|stream| drop(stream))
///     .on_failure(|err| eprintln!("connect failed: {err}"));
///
/// assert!(request.validate().is_ok());
/// ```
pub struct ConnectRequest {
    address: String,
    port: u16,
    timeout: Duration,
    on_success: Option<OnConnected>,
    on_failure: Option<OnFailed>,
}

impl ConnectRequest {
    /// Create a request without callbacks.
    pub fn new(address: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            port,
            timeout,
            on_success: None,
            on_failure: None,
        }
    }

    /// Set the success continuation.
    #[must_use]
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Set the failure continuation.
    #[must_use]
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ConnectError) + Send + 'static,
    {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Target address as given by the caller.
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Target port.
    #[inline]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Maximum time the attempt may stay in flight.
    #[inline]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check that both continuations are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidArgument`] naming the missing callback.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.on_success.is_none() {
            return Err(ConnectError::InvalidArgument("missing success callback"));
        }
        if self.on_failure.is_none() {
            return Err(ConnectError::InvalidArgument("missing failure callback"));
        }
        Ok(())
    }

    /// Split into target parts and the callback pair.
    ///
    /// Returns `None` if either callback is missing.
    pub fn into_parts(self) -> Option<(String, u16, Duration, Callbacks)> {
        let on_success = self.on_success?;
        let on_failure = self.on_failure?;
        Some((
            self.address,
            self.port,
            self.timeout,
            Callbacks {
                on_success,
                on_failure,
            },
        ))
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// The continuation pair of a request. Consumed by exactly one resolution.
pub struct Callbacks {
    on_success: OnConnected,
    on_failure: OnFailed,
}

impl Callbacks {
    /// Pair two continuations.
    pub fn new(on_success: OnConnected, on_failure: OnFailed) -> Self {
        Self {
            on_success,
            on_failure,
        }
    }

    /// Resolve with an established socket.
    pub fn succeed(self, stream: TcpStream) {
        (self.on_success)(stream);
    }

    /// Resolve with a failure.
    pub fn fail(self, error: ConnectError) {
        (self.on_failure)(error);
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callbacks { .. }")
    }
}
