//! In-flight connection tracker.
//!
//! The tracker owns every connect attempt that has not resolved yet, the
//! readiness registrations for them, and the multiplexer itself. It is driven
//! by a single dispatcher thread and takes no locks: every mutation happens
//! through `&mut self` on that thread.
//!
//! # Invariant
//!
//! The set of tokens registered with the poller is exactly the key set of the
//! pending map. A resolving handle leaves both in the same step, before its
//! callback runs.
//!
//! # Resolution
//!
//! Each request resolves exactly once:
//! - immediately in [`ConnectionTracker::attempt_connect`] (fast success or
//!   hard failure),
//! - in [`ConnectionTracker::poll_readiness`] (handshake finished),
//! - in [`ConnectionTracker::expire_timeouts`] (deadline passed),
//! - or in [`ConnectionTracker::abort_all`] (shutdown).
//!
//! Callbacks run under `catch_unwind`; a panicking callback is logged and the
//! remaining resolutions of the same pass still happen.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use mio::Token;
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::endpoint::Target;
use crate::error::ConnectError;
use crate::monitor::{ConnectEvent, ConnectEventSender};
use crate::options::ConnectorOptions;
use crate::poller::{Poller, WAKE_TOKEN};
use crate::request::{Callbacks, ConnectRequest};
use crate::tcp::{self, ConnectOutcome, Probe};

/// Unit of work executed on the dispatcher thread.
pub type Task = Box<dyn FnOnce(&mut ConnectionTracker) + Send + 'static>;

/// A connect attempt waiting for write readiness.
struct PendingConnection {
    stream: mio::net::TcpStream,
    addr: SocketAddr,
    started: Instant,
    timeout: Duration,
    callbacks: Callbacks,
}

/// Owner of all in-flight connect attempts.
pub struct ConnectionTracker {
    poller: Poller<Task>,
    pending: HashMap<Token, PendingConnection>,
    next_token: usize,
    tcp_nodelay: bool,
    events: Option<ConnectEventSender>,
}

impl ConnectionTracker {
    /// Create a tracker around `poller`.
    pub fn new(
        poller: Poller<Task>,
        options: &ConnectorOptions,
        events: Option<ConnectEventSender>,
    ) -> Self {
        Self {
            poller,
            pending: HashMap::new(),
            next_token: 0,
            tcp_nodelay: options.tcp_nodelay,
            events,
        }
    }

    /// Number of unresolved attempts.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `token` belongs to an unresolved attempt.
    #[inline]
    pub fn is_pending(&self, token: Token) -> bool {
        self.pending.contains_key(&token)
    }

    /// Tokens of all unresolved attempts.
    pub fn pending_tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.pending.keys().copied()
    }

    /// Replace the event monitor. `None` detaches it.
    pub fn set_monitor(&mut self, events: Option<ConnectEventSender>) {
        self.events = events;
    }

    /// Whether an event monitor is attached.
    #[inline]
    pub fn is_monitored(&self) -> bool {
        self.events.is_some()
    }

    /// The poller owned by this tracker.
    #[inline]
    pub fn poller(&self) -> &Poller<Task> {
        &self.poller
    }

    /// Issue a non-blocking connect for `request`.
    ///
    /// Fast success and hard failure resolve before this returns; an
    /// in-progress connect is registered for write readiness and tracked.
    /// Returns the tracking token in the latter case.
    pub fn attempt_connect(&mut self, request: ConnectRequest) -> Option<Token> {
        let Some((address, port, timeout, callbacks)) = request.into_parts() else {
            warn!("connect request without callbacks dropped");
            return None;
        };

        let addr = match Target::from_request(&address, port) {
            Ok(target) => target.addr(),
            Err(e) => {
                debug!(%address, port, error = %e, "unusable connect target");
                let err = io::Error::new(io::ErrorKind::InvalidInput, e);
                self.fail(callbacks, None, ConnectError::ConnectFailed(err));
                return None;
            }
        };

        self.publish(ConnectEvent::Attempting(addr));

        match tcp::start_connect(addr) {
            ConnectOutcome::Connected(stream) => {
                trace!(%addr, "connect completed immediately");
                self.hand_off(callbacks, addr, stream);
                None
            }
            ConnectOutcome::InProgress(stream) => self.track(addr, timeout, callbacks, stream),
            ConnectOutcome::Failed(e) => {
                debug!(%addr, error = %e, "connect rejected");
                self.fail(callbacks, Some(addr), ConnectError::ConnectFailed(e));
                None
            }
        }
    }

    fn track(
        &mut self,
        addr: SocketAddr,
        timeout: Duration,
        callbacks: Callbacks,
        stream: TcpStream,
    ) -> Option<Token> {
        let mut stream = mio::net::TcpStream::from_std(stream);
        let token = self.allocate_token();

        if let Err(e) = self.poller.add(&mut stream, token) {
            warn!(%addr, error = %e, "readiness registration failed");
            drop(stream);
            self.fail(callbacks, Some(addr), ConnectError::ConnectFailed(e));
            return None;
        }

        trace!(%addr, token = token.0, ?timeout, "connect in progress");
        self.pending.insert(
            token,
            PendingConnection {
                stream,
                addr,
                started: Instant::now(),
                timeout,
                callbacks,
            },
        );
        Some(token)
    }

    /// Wait up to `bounded_wait` for readiness and resolve every attempt
    /// whose handshake finished.
    ///
    /// The whole batch is classified before any entry is removed or any
    /// callback runs. Returns the number of resolved attempts.
    pub fn poll_readiness(&mut self, bounded_wait: Duration) -> usize {
        let ready = match self.poller.poll(bounded_wait) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "readiness poll failed");
                // Keep the bounded-wait contract so a broken poll cannot spin the caller.
                std::thread::sleep(bounded_wait);
                return 0;
            }
        };

        let mut batch: SmallVec<[(Token, Option<io::Error>); 16]> = SmallVec::new();
        for token in ready {
            let Some(entry) = self.pending.get(&token) else {
                continue;
            };
            match tcp::probe(&entry.stream) {
                Probe::Connected => batch.push((token, None)),
                Probe::Failed(e) => batch.push((token, Some(e))),
                Probe::Pending => trace!(token = token.0, "spurious write readiness"),
            }
        }

        let resolved = batch.len();
        for (token, outcome) in batch {
            let Some(entry) = self.untrack(token) else {
                continue;
            };
            match outcome {
                None => {
                    trace!(addr = %entry.addr, elapsed = ?entry.started.elapsed(), "connected");
                    let stream = tcp::into_std(entry.stream);
                    self.hand_off(entry.callbacks, entry.addr, stream);
                }
                Some(e) => {
                    debug!(addr = %entry.addr, error = %e, "connect failed");
                    drop(entry.stream);
                    self.fail(entry.callbacks, Some(entry.addr), ConnectError::ConnectFailed(e));
                }
            }
        }
        resolved
    }

    /// Run every task queued for this tracker. Returns how many ran.
    pub fn run_queued(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.poller.next_task() {
            contain("task", || task(self));
            ran += 1;
        }
        ran
    }

    /// Resolve every attempt whose timeout has elapsed with
    /// [`ConnectError::Timeout`]. Returns the number expired.
    pub fn expire_timeouts(&mut self) -> usize {
        self.expire_timeouts_at(Instant::now())
    }

    /// [`expire_timeouts`](Self::expire_timeouts) against an explicit clock.
    pub fn expire_timeouts_at(&mut self, now: Instant) -> usize {
        let expired: SmallVec<[Token; 16]> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.started) >= entry.timeout)
            .map(|(token, _)| *token)
            .collect();

        for &token in &expired {
            if let Some(entry) = self.untrack(token) {
                debug!(addr = %entry.addr, timeout = ?entry.timeout, "connect timed out");
                drop(entry.stream);
                self.fail(
                    entry.callbacks,
                    Some(entry.addr),
                    ConnectError::Timeout(entry.timeout),
                );
            }
        }
        expired.len()
    }

    /// Resolve every remaining attempt with [`ConnectError::Aborted`].
    ///
    /// Called once on shutdown. Returns the number aborted.
    pub fn abort_all(&mut self) -> usize {
        let tokens: Vec<Token> = self.pending.keys().copied().collect();
        if !tokens.is_empty() {
            debug!(count = tokens.len(), "aborting pending connects");
        }

        for &token in &tokens {
            if let Some(entry) = self.untrack(token) {
                drop(entry.stream);
                self.fail(entry.callbacks, Some(entry.addr), ConnectError::Aborted);
            }
        }
        tokens.len()
    }

    /// Remove `token` from both the pending map and the registration set.
    fn untrack(&mut self, token: Token) -> Option<PendingConnection> {
        let mut entry = self.pending.remove(&token)?;
        if let Err(e) = self.poller.remove(&mut entry.stream, token) {
            trace!(token = token.0, error = %e, "deregister failed");
        }
        Some(entry)
    }

    /// Send `event` to the monitor, detaching it once its receiver is gone.
    fn publish(&mut self, event: ConnectEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        if tx.send(event).is_err() {
            trace!("monitor receiver dropped; detaching");
            self.events = None;
        }
    }

    fn allocate_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);
            self.next_token = (self.next_token + 1) % WAKE_TOKEN.0;
            if !self.pending.contains_key(&token) {
                return token;
            }
        }
    }

    fn hand_off(&mut self, callbacks: Callbacks, addr: SocketAddr, stream: TcpStream) {
        if let Err(e) = tcp::prepare_handoff(&stream, self.tcp_nodelay) {
            warn!(%addr, error = %e, "failed to set TCP_NODELAY");
        }
        self.publish(ConnectEvent::Connected(addr));
        contain("on_success", move || callbacks.succeed(stream));
    }

    fn fail(&mut self, callbacks: Callbacks, addr: Option<SocketAddr>, err: ConnectError) {
        self.publish(ConnectEvent::Failed {
            addr,
            kind: err.kind(),
        });
        contain("on_failure", move || callbacks.fail(err));
    }
}

impl Drop for ConnectionTracker {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.abort_all();
        }
    }
}

impl fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("pending", &self.pending.len())
            .field("poller", &self.poller)
            .finish()
    }
}

/// Run `f`, logging instead of propagating a panic.
fn contain<F: FnOnce()>(what: &'static str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!(
            callback = what,
            panic = panic_message(payload.as_ref()),
            "callback panicked; continuing"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::monitor::create_monitor;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    type Outcomes = Arc<Mutex<Vec<Result<SocketAddr, FailureKind>>>>;

    fn tracker() -> ConnectionTracker {
        let (poller, _queue) = Poller::new(64).unwrap();
        ConnectionTracker::new(poller, &ConnectorOptions::default(), None)
    }

    fn recording(address: &str, port: u16, timeout: Duration, out: &Outcomes) -> ConnectRequest {
        let ok = out.clone();
        let failed = out.clone();
        ConnectRequest::new(address, port, timeout)
            .on_success(move |stream| {
                ok.lock().unwrap().push(Ok(stream.peer_addr().unwrap()));
            })
            .on_failure(move |err| {
                failed.lock().unwrap().push(Err(err.kind()));
            })
    }

    fn assert_registration_matches(tracker: &ConnectionTracker) {
        let mut registered: Vec<usize> = tracker.poller().registered().map(|t| t.0).collect();
        let mut pending: Vec<usize> = tracker.pending_tokens().map(|t| t.0).collect();
        registered.sort_unstable();
        pending.sort_unstable();
        assert_eq!(registered, pending);
    }

    /// Drive readiness until nothing is pending or `limit` passes.
    fn settle(tracker: &mut ConnectionTracker, limit: Duration) {
        let deadline = Instant::now() + limit;
        while tracker.pending_len() > 0 && Instant::now() < deadline {
            tracker.poll_readiness(Duration::from_millis(10));
            assert_registration_matches(tracker);
        }
    }

    #[test]
    fn test_loopback_connects_resolve_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let out: Outcomes = Arc::default();
        let mut tracker = tracker();

        for _ in 0..8 {
            tracker.attempt_connect(recording("127.0.0.1", port, Duration::from_secs(5), &out));
            assert_registration_matches(&tracker);
        }
        settle(&mut tracker, Duration::from_secs(5));

        let out = out.lock().unwrap();
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|r| r.as_ref().map(|a| a.port()) == Ok(port)));
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(tracker.poller().registered_len(), 0);
    }

    #[test]
    fn test_refused_port_is_connect_failed() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let out: Outcomes = Arc::default();
        let mut tracker = tracker();

        tracker.attempt_connect(recording("127.0.0.1", port, Duration::from_secs(5), &out));
        settle(&mut tracker, Duration::from_secs(5));

        assert_eq!(*out.lock().unwrap(), vec![Err(FailureKind::ConnectFailed)]);
    }

    #[test]
    fn test_invalid_target_fails_synchronously() {
        let out: Outcomes = Arc::default();
        let mut tracker = tracker();

        let token = tracker.attempt_connect(recording("not-an-ip", 80, Duration::from_secs(1), &out));
        assert!(token.is_none());
        assert_eq!(*out.lock().unwrap(), vec![Err(FailureKind::ConnectFailed)]);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn test_expire_and_abort_only_touch_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let out: Outcomes = Arc::default();
        let mut tracker = tracker();

        let first = tracker.attempt_connect(recording("127.0.0.1", port, Duration::from_millis(1), &out));
        let second = tracker.attempt_connect(recording("127.0.0.1", port, Duration::from_secs(3600), &out));
        let in_flight = [first, second].iter().flatten().count();

        // Far past the short deadline, well before the long one.
        let expired = tracker.expire_timeouts_at(Instant::now() + Duration::from_secs(60));
        assert_eq!(expired, usize::from(first.is_some()));
        assert_registration_matches(&tracker);

        let aborted = tracker.abort_all();
        assert_eq!(aborted, usize::from(second.is_some()));
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(tracker.abort_all(), 0);

        let out = out.lock().unwrap();
        assert_eq!(out.len(), 2, "every request resolves exactly once");
        assert_eq!(
            out.iter().filter(|r| **r == Err(FailureKind::Timeout)).count()
                + out.iter().filter(|r| **r == Err(FailureKind::Aborted)).count(),
            in_flight
        );
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let out: Outcomes = Arc::default();
        let mut tracker = tracker();

        let boom = ConnectRequest::new("127.0.0.1", port, Duration::from_secs(5))
            .on_success(|_| panic!("consumer exploded"))
            .on_failure(|_| panic!("consumer exploded"));
        tracker.attempt_connect(boom);
        tracker.attempt_connect(recording("127.0.0.1", port, Duration::from_secs(5), &out));
        settle(&mut tracker, Duration::from_secs(5));

        assert_eq!(out.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_queued_tasks_run_on_tracker() {
        let (poller, queue) = Poller::<Task>::new(16).unwrap();
        let (events_tx, events) = create_monitor();
        let mut tracker = ConnectionTracker::new(poller, &ConnectorOptions::default(), Some(events_tx));

        let out: Outcomes = Arc::default();
        let request = recording("256.0.0.1", 1, Duration::from_secs(1), &out);
        let queued = queue.enqueue(Box::new(move |t: &mut ConnectionTracker| {
            t.attempt_connect(request);
        }));
        assert!(queued.is_ok());

        assert_eq!(tracker.run_queued(), 1);
        assert_eq!(*out.lock().unwrap(), vec![Err(FailureKind::ConnectFailed)]);
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectEvent::Failed {
                addr: None,
                kind: FailureKind::ConnectFailed
            }
        );
    }

    #[test]
    fn test_dropped_monitor_is_detached() {
        let (events_tx, events) = create_monitor();
        let (poller, _queue) = Poller::<Task>::new(16).unwrap();
        let mut tracker = ConnectionTracker::new(poller, &ConnectorOptions::default(), Some(events_tx));
        let out: Outcomes = Arc::default();

        tracker.attempt_connect(recording("bogus", 1, Duration::from_secs(1), &out));
        assert_eq!(events.len(), 1);
        assert!(tracker.is_monitored());

        drop(events);
        tracker.attempt_connect(recording("bogus", 1, Duration::from_secs(1), &out));
        assert!(!tracker.is_monitored());
        assert_eq!(out.lock().unwrap().len(), 2);

        let (events_tx, events) = create_monitor();
        tracker.set_monitor(Some(events_tx));
        tracker.attempt_connect(recording("bogus", 1, Duration::from_secs(1), &out));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_url_target_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let out: Outcomes = Arc::default();
        let mut tracker = tracker();

        let url = format!("tcp://127.0.0.1:{port}");
        tracker.attempt_connect(recording(&url, 0, Duration::from_secs(5), &out));
        settle(&mut tracker, Duration::from_secs(5));

        assert_eq!(*out.lock().unwrap(), vec![Ok(listener.local_addr().unwrap())]);
    }

    #[test]
    fn test_drop_aborts_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let out: Outcomes = Arc::default();

        let mut tracker = tracker();
        let token = tracker.attempt_connect(recording("127.0.0.1", port, Duration::from_secs(60), &out));
        drop(tracker);

        let out = out.lock().unwrap();
        assert_eq!(out.len(), 1);
        if token.is_some() {
            assert_eq!(out[0], Err(FailureKind::Aborted));
        }
    }
}
