//! Task update fan-out.
//!
//! Every subscriber owns a bounded channel. Emission never waits: when a
//! subscriber's channel is full the newest snapshot is dropped for that
//! subscriber, and closed subscribers are pruned on the next emission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::models::task::Task;
use crate::orchestrator::lock;

/// Fan-out of task snapshots to any number of observers.
#[derive(Debug)]
pub struct Notifier {
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<Task>>>,
    dropped: AtomicU64,
}

impl Notifier {
    /// Create a notifier whose subscribers buffer up to `capacity` snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new observer.
    #[must_use]
    pub fn subscribe(&self) -> TaskUpdates {
        let (tx, rx) = mpsc::channel(self.capacity);
        lock(&self.subscribers).push(tx);
        TaskUpdates { rx }
    }

    /// Deliver a snapshot of `task` to every live subscriber without blocking.
    ///
    /// A subscriber whose channel is full misses this snapshot and the miss
    /// is counted in [`dropped`](Self::dropped). A subscriber whose
    /// [`TaskUpdates`] was dropped is removed.
    pub fn emit(&self, task: &Task) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(task.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(task_id = task.id, "subscriber full, dropping update");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("pruning closed task update subscriber");
                false
            }
        });
    }

    /// Number of subscribers still registered.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Snapshots discarded because a subscriber was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Read-only handle to the task update stream.
///
/// Snapshots arrive in the order the store produced them, but a slow reader
/// can miss some once its buffer is full. Readers that must see a final
/// status should confirm it against the store, as
/// [`Scheduler::follow`](crate::orchestrator::scheduler::Scheduler::follow)
/// does. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct TaskUpdates {
    rx: mpsc::Receiver<Task>,
}

impl TaskUpdates {
    /// Wait for the next snapshot of any task.
    ///
    /// Returns `None` once the store that issued this handle is gone.
    ///
    /// # Cancel safety
    ///
    /// Cancel safe: a snapshot is either returned or left in the buffer.
    pub async fn recv(&mut self) -> Option<Task> {
        self.rx.recv().await
    }

    /// Take a buffered snapshot without waiting.
    ///
    /// Returns `None` both when the buffer is empty and when the store is
    /// gone.
    pub fn try_recv(&mut self) -> Option<Task> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next snapshot of `task_id`.
    ///
    /// Snapshots of other tasks read along the way are discarded. Returns
    /// `None` once the store that issued this handle is gone.
    ///
    /// # Cancel safety
    ///
    /// Cancel safe for `task_id`: if the future is dropped before it
    /// completes, no snapshot of `task_id` has been consumed. Snapshots of
    /// other tasks it already skipped are lost.
    pub async fn recv_for(&mut self, task_id: &str) -> Option<Task> {
        while let Some(task) = self.rx.recv().await {
            if task.id == task_id {
                return Some(task);
            }
        }
        None
    }
}
