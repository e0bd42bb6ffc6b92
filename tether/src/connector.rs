//! Connector façade.
//!
//! Thread-safe handle over one dispatcher thread. Callers submit requests;
//! the dispatcher performs every socket operation and fires the callbacks.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start()──▶ Running ──stop()──▶ Stopped
//!                            ▲                  │
//!                            └─────start()──────┘
//! ```
//!
//! The queue handle, run flag and thread handle of a running connector are
//! published together by `start()` and torn down together by `stop()`, both
//! under the exclusive side of an `RwLock`. Submissions take the shared side,
//! so they never observe a half-built or half-torn-down worker.

use std::fmt;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tether_core::error::{ConnectError, Result};
use tether_core::monitor::{create_monitor, ConnectEventSender, ConnectMonitor};
use tether_core::options::ConnectorOptions;
use tether_core::poller::{Poller, TaskQueue};
use tether_core::request::ConnectRequest;
use tether_core::tracker::{ConnectionTracker, Task};
use tracing::{debug, error, trace, warn};

use crate::dispatcher::{self, Dispatcher};
use crate::pending::PendingConnect;

static NEXT_CONNECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Observable lifecycle state of a [`Connector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// `start()` has never been called.
    NotStarted,
    /// Dispatcher thread is running and accepting submissions.
    Running,
    /// Dispatcher thread has been stopped and joined.
    Stopped,
}

/// Resources of a running dispatcher, replaced as one unit.
struct Worker {
    queue: TaskQueue<Task>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Signal the dispatcher and wait for it to finish aborting.
    fn shutdown(self) {
        if let Err(task) = self.queue.enqueue(dispatcher::stop_task(self.running.clone())) {
            // Dispatcher already gone; nothing will run the task.
            drop(task);
            self.running.store(false, Ordering::Release);
        }

        if self.thread.join().is_err() {
            error!("connector dispatcher thread panicked");
        }
    }
}

enum Lifecycle {
    NotStarted,
    Running(Worker),
    Stopped,
}

/// Asynchronous outbound connector.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether::Connector;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = Connector::create();
/// connector.start()?;
///
/// connector.connect_async(
///     "127.0.0.1",
///     8080,
///     Duration::from_secs(2),
///     |stream| println!("connected to {:?}", stream.peer_addr()),
///     |err| eprintln!("connect failed: {err}"),
/// )?;
///
/// connector.stop();
/// # Ok(())
/// # }
/// ```
///
/// # Caller constraints
///
/// Callbacks run on the dispatcher thread. They must not block for long, and
/// they must not call [`Connector::stop`] on the connector that invoked them:
/// `stop()` joins the dispatcher, which cannot join itself. Such a call is
/// detected, logged and ignored.
pub struct Connector {
    id: u64,
    lifecycle: RwLock<Lifecycle>,
    options: ConnectorOptions,
    monitor: Mutex<Option<ConnectEventSender>>,
}

impl Connector {
    /// Create a shareable connector with default options.
    #[must_use]
    pub fn create() -> Arc<Self> {
        Arc::new(Self::new(ConnectorOptions::default()))
    }

    /// Create a shareable connector with `options`.
    #[must_use]
    pub fn with_options(options: ConnectorOptions) -> Arc<Self> {
        Arc::new(Self::new(options))
    }

    /// Create a connector in the `NotStarted` state.
    #[must_use]
    pub fn new(options: ConnectorOptions) -> Self {
        Self {
            id: NEXT_CONNECTOR_ID.fetch_add(1, Ordering::Relaxed),
            lifecycle: RwLock::new(Lifecycle::NotStarted),
            options,
            monitor: Mutex::new(None),
        }
    }

    /// Options this connector was built with.
    #[inline]
    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    /// Current lifecycle state.
    ///
    /// Inside a callback racing `stop()` this reports `Stopped`.
    pub fn state(&self) -> ConnectorState {
        let Some(lifecycle) = self.shared_lifecycle() else {
            return ConnectorState::Stopped;
        };
        match &*lifecycle {
            Lifecycle::NotStarted => ConnectorState::NotStarted,
            Lifecycle::Running(_) => ConnectorState::Running,
            Lifecycle::Stopped => ConnectorState::Stopped,
        }
    }

    /// Whether submissions are currently accepted.
    pub fn is_running(&self) -> bool {
        match self.shared_lifecycle().as_deref() {
            Some(Lifecycle::Running(worker)) => worker.running.load(Ordering::Acquire),
            _ => false,
        }
    }

    /// Attach a new receiver of connection lifecycle events.
    ///
    /// Returns `None` unless monitoring is enabled in the options. Each call
    /// replaces the previous monitor, whose receiver then disconnects. Clones
    /// of the returned receiver share one queue: each event reaches one of
    /// them. Dropping every clone detaches the monitor.
    pub fn monitor(&self) -> Option<ConnectMonitor> {
        if !self.options.monitor {
            return None;
        }
        let (sender, receiver) = create_monitor();

        // Lifecycle before slot, the same order as `start()`.
        let lifecycle = self.shared_lifecycle();
        *self.monitor.lock() = Some(sender.clone());

        if let Some(Lifecycle::Running(worker)) = lifecycle.as_deref() {
            let task: Task = Box::new(move |tracker: &mut ConnectionTracker| {
                tracker.set_monitor(Some(sender));
            });
            if worker.queue.enqueue(task).is_err() {
                trace!(connector = self.id, "dispatcher gone; monitor kept for next start");
            }
        }
        Some(receiver)
    }

    /// Start the dispatcher thread. No-op if already running.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::SocketCreateFailed`] if the poll instance or its
    ///   waker cannot be created
    /// - [`ConnectError::WorkerSpawn`] if the thread cannot be spawned
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Ok(());
        }

        let (poller, queue) =
            Poller::<Task>::new(self.options.event_capacity).map_err(ConnectError::SocketCreateFailed)?;
        let running = Arc::new(AtomicBool::new(true));

        let id = self.id;
        let flag = running.clone();
        let options = self.options.clone();
        let events = self.monitor.lock().clone();

        let thread = thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || {
                let tracker = ConnectionTracker::new(poller, &options, events);
                Dispatcher::new(id, tracker, flag, options.poll_interval).run();
            })
            .map_err(ConnectError::WorkerSpawn)?;

        *lifecycle = Lifecycle::Running(Worker {
            queue,
            running,
            thread,
        });
        debug!(connector = id, "connector started");
        Ok(())
    }

    /// Stop the dispatcher thread and wait for it to exit. No-op if not
    /// running.
    ///
    /// Every attempt still in flight resolves with [`ConnectError::Aborted`]
    /// before this returns; no callback fires afterwards.
    ///
    /// Must not be called from a callback of this connector (see the type
    /// docs); such a call is ignored.
    pub fn stop(&self) {
        if dispatcher::is_dispatcher_of(self.id) {
            error!(
                connector = self.id,
                "stop() called from the connector's own dispatcher thread; ignored"
            );
            return;
        }

        let mut lifecycle = self.lifecycle.write();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(worker) => {
                worker.shutdown();
                debug!(connector = self.id, "connector stopped");
            }
            other => *lifecycle = other,
        }
    }

    /// Submit a request. Never blocks on network I/O.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::InvalidArgument`] if either callback is missing
    /// - [`ConnectError::NotRunning`] if the dispatcher is not running
    pub fn submit(&self, request: ConnectRequest) -> Result<()> {
        request.validate()?;

        let lifecycle = self.shared_lifecycle().ok_or(ConnectError::NotRunning)?;
        let Lifecycle::Running(worker) = &*lifecycle else {
            return Err(ConnectError::NotRunning);
        };
        if !worker.running.load(Ordering::Acquire) {
            return Err(ConnectError::NotRunning);
        }

        let task: Task = Box::new(move |tracker: &mut ConnectionTracker| {
            tracker.attempt_connect(request);
        });
        worker.queue.enqueue(task).map_err(|_| {
            warn!(connector = self.id, "dispatcher queue closed");
            ConnectError::NotRunning
        })
    }

    /// Submit a connect to `address:port` with explicit continuations.
    ///
    /// `address` is an IPv4 or IPv6 literal, or a `tcp://ip:port` target whose
    /// own port takes precedence over `port`.
    ///
    /// # Errors
    ///
    /// See [`Connector::submit`].
    pub fn connect_async<S, F>(
        &self,
        address: impl Into<String>,
        port: u16,
        timeout: Duration,
        on_success: S,
        on_failure: F,
    ) -> Result<()>
    where
        S: FnOnce(TcpStream) + Send + 'static,
        F: FnOnce(ConnectError) + Send + 'static,
    {
        let request = ConnectRequest::new(address, port, timeout)
            .on_success(on_success)
            .on_failure(on_failure);
        self.submit(request)
    }

    /// Submit a connect and get a handle to wait on its outcome.
    ///
    /// # Errors
    ///
    /// [`ConnectError::NotRunning`] if the dispatcher is not running.
    pub fn connect(
        &self,
        address: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> Result<PendingConnect> {
        let (request, pending) = PendingConnect::wire(ConnectRequest::new(address, port, timeout));
        self.submit(request)?;
        Ok(pending)
    }

    /// Shared access to the lifecycle.
    ///
    /// On this connector's own dispatcher thread the wait is bounded: a
    /// concurrent `stop()` holds the exclusive side while joining that very
    /// thread.
    fn shared_lifecycle(&self) -> Option<RwLockReadGuard<'_, Lifecycle>> {
        if dispatcher::is_dispatcher_of(self.id) {
            self.lifecycle.try_read_for(self.options.poll_interval)
        } else {
            Some(self.lifecycle.read())
        }
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if dispatcher::is_dispatcher_of(self.id) {
            // Last handle dropped inside a callback: the dispatcher cannot join
            // itself, so let it wind down and abort on its own.
            if let Lifecycle::Running(worker) =
                std::mem::replace(self.lifecycle.get_mut(), Lifecycle::Stopped)
            {
                worker.running.store(false, Ordering::Release);
            }
            return;
        }
        self.stop();
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}
