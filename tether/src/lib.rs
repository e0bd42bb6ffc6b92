//! # Tether
//!
//! Asynchronous, non-blocking outbound TCP connection establishment.
//!
//! A [`Connector`] owns one dispatcher thread. Callers on any thread submit
//! connect requests; the dispatcher issues the non-blocking `connect`, waits
//! for write readiness, enforces per-request timeouts and resolves every
//! request exactly once, either handing the established socket to the
//! success continuation or reporting a [`ConnectError`] to the failure one.
//!
//! ## Architecture
//!
//! - **`tether-core`**: request value, readiness multiplexer + task queue,
//!   socket primitives, single-writer connection tracker
//! - **`tether`**: dispatcher loop and the thread-safe façade (this crate)
//!
//! ## Quick Start
//!
//! ### Callbacks
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tether::Connector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Connector::create();
//! connector.start()?;
//!
//! connector.connect_async(
//!     "127.0.0.1",
//!     6379,
//!     Duration::from_millis(500),
//!     |stream| {
//!         // The session layer owns the socket from here on.
//!         let _ = stream.peer_addr();
//!     },
//!     |err| eprintln!("connect failed: {err}"),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Completion handle
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tether::Connector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Connector::create();
//! connector.start()?;
//!
//! let stream = connector
//!     .connect("::1", 8080, Duration::from_secs(1))?
//!     .wait()?;
//! println!("connected to {}", stream.peer_addr()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - `submit` never blocks on network I/O
//! - every accepted request resolves exactly once; `stop()` aborts whatever
//!   is still in flight before returning
//! - a panicking callback is contained and logged; the dispatcher keeps going

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connector;
mod dispatcher;
mod pending;

pub mod dev_tracing;

pub use connector::{Connector, ConnectorState};
pub use pending::PendingConnect;

pub use tether_core::endpoint::{Target, TargetError};
pub use tether_core::error::{ConnectError, FailureKind, Result};
pub use tether_core::monitor::{ConnectEvent, ConnectMonitor};
pub use tether_core::options::ConnectorOptions;
pub use tether_core::request::{ConnectRequest, OnConnected, OnFailed};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ConnectError, ConnectEvent, ConnectRequest, Connector, ConnectorOptions, ConnectorState,
        FailureKind, PendingConnect,
    };
}
