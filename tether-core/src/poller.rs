//! Readiness multiplexer and cross-thread task queue.
//!
//! The [`Poller`] owns the OS poll instance and is driven by exactly one
//! thread. Other threads reach that thread through a [`TaskQueue`]: tasks
//! travel over a `flume` channel and a `mio::Waker` cuts the current bounded
//! wait short so they run promptly.
//!
//! Platform-specific readiness handling stays behind this module; callers see
//! `add` / `remove` / `poll` over tokens plus `enqueue`.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use hashbrown::HashSet;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use smallvec::SmallVec;

/// Token reserved for the task-queue waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Handles reported ready by one poll.
pub type ReadySet = SmallVec<[Token; 16]>;

/// OS readiness multiplexer for in-flight connects plus the receiving side
/// of the task queue.
pub struct Poller<T> {
    poll: Poll,
    events: Events,
    registered: HashSet<Token>,
    tasks: Receiver<T>,
}

impl<T> Poller<T> {
    /// Create the poll instance, its waker, and the task queue feeding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll or waker descriptors cannot be created.
    pub fn new(event_capacity: usize) -> io::Result<(Self, TaskQueue<T>)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (tx, rx) = flume::unbounded();

        let poller = Self {
            poll,
            events: Events::with_capacity(event_capacity.max(1)),
            registered: HashSet::new(),
            tasks: rx,
        };
        Ok((poller, TaskQueue { tx, waker }))
    }

    /// Register `stream` for write readiness under `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS rejects the registration.
    pub fn add(&mut self, stream: &mut TcpStream, token: Token) -> io::Result<()> {
        debug_assert_ne!(token, WAKE_TOKEN);
        self.poll
            .registry()
            .register(stream, token, Interest::WRITABLE)?;
        self.registered.insert(token);
        Ok(())
    }

    /// Drop the write-readiness registration of `stream`.
    ///
    /// The token leaves the registration set even if the OS call fails; the
    /// descriptor is about to be closed or handed off either way.
    pub fn remove(&mut self, stream: &mut TcpStream, token: Token) -> io::Result<()> {
        self.registered.remove(&token);
        self.poll.registry().deregister(stream)
    }

    /// Whether `token` is currently registered.
    #[inline]
    pub fn is_registered(&self, token: Token) -> bool {
        self.registered.contains(&token)
    }

    /// Number of registered handles.
    #[inline]
    pub fn registered_len(&self) -> usize {
        self.registered.len()
    }

    /// Iterate the registration set.
    pub fn registered(&self) -> impl Iterator<Item = Token> + '_ {
        self.registered.iter().copied()
    }

    /// Wait up to `timeout` and return every registered handle reported
    /// writable or errored.
    ///
    /// Wake-ups from the task queue are consumed here and never reported.
    /// An interrupted wait returns an empty set.
    ///
    /// # Errors
    ///
    /// Returns any other error from the OS poll call.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<ReadySet> {
        let mut ready = ReadySet::new();

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(ready),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN || !self.registered.contains(&token) {
                continue;
            }
            if event.is_writable() || event.is_error() || event.is_write_closed() {
                ready.push(token);
            }
        }

        Ok(ready)
    }

    /// Take the next queued task without blocking.
    #[inline]
    pub fn next_task(&self) -> Option<T> {
        self.tasks.try_recv().ok()
    }
}

impl<T> fmt::Debug for Poller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("registered", &self.registered.len())
            .field("queued_tasks", &self.tasks.len())
            .finish()
    }
}

/// Sending side of a [`Poller`]'s task queue. Cheap to clone, `Send`.
pub struct TaskQueue<T> {
    tx: Sender<T>,
    waker: Arc<Waker>,
}

impl<T> TaskQueue<T> {
    /// Queue `task` for the polling thread and interrupt its current wait.
    ///
    /// # Errors
    ///
    /// Gives the task back if the polling side has been dropped.
    pub fn enqueue(&self, task: T) -> Result<(), T> {
        self.tx.send(task).map_err(|e| e.into_inner())?;
        if let Err(e) = self.waker.wake() {
            // The task is queued; it runs after the current wait expires.
            tracing::warn!(error = %e, "failed to wake poller");
        }
        Ok(())
    }

    /// Whether the polling side still exists.
    #[inline]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_disconnected()
    }
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.tx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_enqueue_wakes_poll() {
        let (mut poller, queue) = Poller::<u32>::new(16).unwrap();

        let remote = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.enqueue(7).unwrap();
        });

        let started = Instant::now();
        let ready = poller.poll(Duration::from_secs(5)).unwrap();
        assert!(ready.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();

        assert_eq!(poller.next_task(), Some(7));
        assert_eq!(poller.next_task(), None);
    }

    #[test]
    fn test_enqueue_after_drop_returns_task() {
        let (poller, queue) = Poller::<&'static str>::new(4).unwrap();
        drop(poller);
        assert!(!queue.is_connected());
        assert_eq!(queue.enqueue("late"), Err("late"));
    }

    #[test]
    fn test_registration_set_tracks_add_remove() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (mut poller, _queue) = Poller::<()>::new(16).unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        poller.add(&mut stream, Token(3)).unwrap();
        assert!(poller.is_registered(Token(3)));
        assert_eq!(poller.registered_len(), 1);

        let ready = poller.poll(Duration::from_secs(2)).unwrap();
        assert_eq!(ready.as_slice(), &[Token(3)]);

        poller.remove(&mut stream, Token(3)).unwrap();
        assert!(!poller.is_registered(Token(3)));
        assert_eq!(poller.registered().count(), 0);
    }
}
