//! Tether Core
//!
//! This crate contains the building blocks of the outbound connector:
//! - Connect request value and callback pair (`request`)
//! - IP-literal targets (`endpoint`)
//! - Non-blocking socket primitives (`tcp`)
//! - Readiness multiplexer + cross-thread task queue (`poller`)
//! - Single-writer in-flight connection tracker (`tracker`)
//! - Lifecycle event stream (`monitor`)
//! - Options and error types (`options`, `error`)

// The tcp module needs raw fd/socket access to move descriptors between owners
#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]

pub mod endpoint;
pub mod error;
pub mod monitor;
pub mod options;
pub mod poller;
pub mod request;
pub mod tcp;
pub mod tracker;

pub use mio::Token;

// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::endpoint::Target;
    pub use crate::error::{ConnectError, FailureKind};
    pub use crate::monitor::{ConnectEvent, ConnectMonitor};
    pub use crate::options::ConnectorOptions;
    pub use crate::request::{ConnectRequest, OnConnected, OnFailed};
    pub use crate::tracker::{ConnectionTracker, Task};
}
