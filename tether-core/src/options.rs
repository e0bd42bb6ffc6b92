//! Connector configuration options

use std::time::Duration;

/// Connector configuration options.
///
/// # Examples
///
/// ```
/// use tether_core::options::ConnectorOptions;
/// use std::time::Duration;
///
/// let opts = ConnectorOptions::default()
///     .with_poll_interval(Duration::from_millis(5))
///     .with_tcp_nodelay(true);
///
/// assert_eq!(opts.poll_interval, Duration::from_millis(5));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Bounded wait of one dispatcher iteration.
    ///
    /// Caps shutdown latency and the granularity at which timeouts fire.
    /// - Default: 10ms
    pub poll_interval: Duration,

    /// Readiness events drained per poll.
    /// - Default: 256
    pub event_capacity: usize,

    /// Set `TCP_NODELAY` on established sockets before hand-off.
    /// - Default: false
    pub tcp_nodelay: bool,

    /// Name given to the dispatcher thread.
    /// - Default: "tether-connector"
    pub thread_name: String,

    /// Publish connection lifecycle events on the monitor channel.
    /// - Default: false
    pub monitor: bool,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            event_capacity: 256,
            tcp_nodelay: false,
            thread_name: "tether-connector".to_string(),
            monitor: false,
        }
    }
}

impl ConnectorOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dispatcher poll interval.
    ///
    /// A zero interval turns the dispatcher into a busy loop and is raised
    /// to one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the number of readiness events drained per poll (minimum 1).
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Enable or disable `TCP_NODELAY` on established sockets.
    #[must_use]
    pub const fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Set the dispatcher thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Enable or disable the lifecycle event monitor.
    #[must_use]
    pub const fn with_monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ConnectorOptions::default();
        assert_eq!(opts.poll_interval, Duration::from_millis(10));
        assert_eq!(opts.event_capacity, 256);
        assert!(!opts.tcp_nodelay);
        assert!(!opts.monitor);
        assert_eq!(opts.thread_name, "tether-connector");
    }

    #[test]
    fn test_lower_bounds() {
        let opts = ConnectorOptions::new()
            .with_poll_interval(Duration::ZERO)
            .with_event_capacity(0);
        assert_eq!(opts.poll_interval, Duration::from_millis(1));
        assert_eq!(opts.event_capacity, 1);
    }
}
