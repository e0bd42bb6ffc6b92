//! Dispatcher loop.
//!
//! One dedicated thread per running connector. Each iteration:
//!
//! 1. waits on the multiplexer for at most `poll_interval`, resolving any
//!    handshakes that finish meanwhile,
//! 2. runs queued submissions (one `attempt_connect` each),
//! 3. reconciles readiness again without waiting,
//! 4. expires timed-out attempts.
//!
//! The tracker is only ever touched from here, so it needs no locking.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_core::tracker::{ConnectionTracker, Task};
use tracing::{debug, trace};

thread_local! {
    /// Id of the connector whose dispatcher runs on this thread.
    static DISPATCHER_OF: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Whether the current thread is the dispatcher of connector `id`.
pub(crate) fn is_dispatcher_of(id: u64) -> bool {
    DISPATCHER_OF.with(|owner| owner.get() == Some(id))
}

/// Task that clears the run flag; the loop observes it on its next check.
pub(crate) fn stop_task(running: Arc<AtomicBool>) -> Task {
    Box::new(move |_: &mut ConnectionTracker| {
        running.store(false, Ordering::Release);
    })
}

pub(crate) struct Dispatcher {
    connector_id: u64,
    tracker: ConnectionTracker,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        connector_id: u64,
        tracker: ConnectionTracker,
        running: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connector_id,
            tracker,
            running,
            poll_interval,
        }
    }

    /// Drive the loop until the run flag clears, then abort what is left.
    pub(crate) fn run(mut self) {
        DISPATCHER_OF.with(|owner| owner.set(Some(self.connector_id)));
        debug!(connector = self.connector_id, "dispatcher started");

        while self.running.load(Ordering::Acquire) {
            self.run_once();
        }

        // Submissions queued before the stop signal still resolve exactly once.
        self.tracker.run_queued();
        let aborted = self.tracker.abort_all();

        DISPATCHER_OF.with(|owner| owner.set(None));
        debug!(connector = self.connector_id, aborted, "dispatcher stopped");
    }

    fn run_once(&mut self) {
        let resolved = self.tracker.poll_readiness(self.poll_interval);
        let submitted = self.tracker.run_queued();
        let reconciled = self.tracker.poll_readiness(Duration::ZERO);
        let expired = self.tracker.expire_timeouts();

        if resolved + submitted + reconciled + expired > 0 {
            trace!(
                resolved,
                submitted,
                reconciled,
                expired,
                pending = self.tracker.pending_len(),
                "dispatcher pass"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::options::ConnectorOptions;
    use tether_core::poller::Poller;

    #[test]
    fn test_stop_task_ends_loop() {
        let (poller, queue) = Poller::<Task>::new(16).unwrap();
        let tracker = ConnectionTracker::new(poller, &ConnectorOptions::default(), None);
        let running = Arc::new(AtomicBool::new(true));

        assert!(queue.enqueue(stop_task(running.clone())).is_ok());
        Dispatcher::new(7, tracker, running.clone(), Duration::from_millis(5)).run();

        assert!(!running.load(Ordering::Acquire));
        assert!(!is_dispatcher_of(7));
    }

    #[test]
    fn test_thread_marked_while_running() {
        let (poller, queue) = Poller::<Task>::new(16).unwrap();
        let tracker = ConnectionTracker::new(poller, &ConnectorOptions::default(), None);
        let running = Arc::new(AtomicBool::new(true));
        let (seen_tx, seen_rx) = flume::bounded(1);

        let probe = queue.enqueue(Box::new(move |_: &mut ConnectionTracker| {
            let _ = seen_tx.send(is_dispatcher_of(11));
        }));
        assert!(probe.is_ok());
        assert!(queue.enqueue(stop_task(running.clone())).is_ok());

        let handle = std::thread::spawn(move || {
            Dispatcher::new(11, tracker, running, Duration::from_millis(5)).run();
        });
        handle.join().unwrap();

        assert!(seen_rx.recv().unwrap());
        assert!(!is_dispatcher_of(11));
    }
}
