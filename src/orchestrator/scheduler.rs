//! Scheduler loop: admits queued tasks into workers on a fixed tick.
//!
//! Each tick counts tasks occupying a worker slot and, while that count is
//! under `max_workers`, pops the queue head and starts a worker for it. A
//! task cancelled between enqueue and admission is skipped by the store's
//! re-check, so "cancel while queued" never needs a process handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::config::GlobalConfig;
use crate::models::task::Task;
use crate::orchestrator::notifier::TaskUpdates;
use crate::orchestrator::store::TaskStore;
use crate::orchestrator::worker::{spawn_worker, WorkerSettings};
use crate::providers::{builtin_builders, CommandBuilder};
use crate::Result;

/// Owns the task store and drives admission.
#[derive(Debug)]
pub struct Scheduler {
    store: Arc<TaskStore>,
    max_workers: usize,
    tick_interval: Duration,
    worker: WorkerSettings,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Scheduler with an empty builder registry.
    ///
    /// Register builders with [`register_builder`](Self::register_builder)
    /// and call [`start`](Self::start) to begin ticking.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            store: Arc::new(TaskStore::new(config.update_capacity)),
            max_workers: config.max_workers.max(1),
            tick_interval: config.tick_interval(),
            worker: WorkerSettings {
                max_line_bytes: config.max_line_bytes,
                reader_drain: config.reader_drain(),
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// Scheduler with the enabled built-in providers registered.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        let scheduler = Self::new(config);
        for (provider_id, builder) in builtin_builders(&config.providers) {
            scheduler.register_builder(provider_id, builder);
        }
        scheduler
    }

    /// Register (or replace) the command builder for `provider_id`.
    pub fn register_builder(&self, provider_id: impl Into<String>, builder: CommandBuilder) {
        self.store.register_builder(provider_id, builder);
    }

    /// The task store: enqueue, query, pause, resume, cancel, remove.
    #[must_use]
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Observe every task state change from now on.
    #[must_use]
    pub fn subscribe(&self) -> TaskUpdates {
        self.store.subscribe()
    }

    /// Configured worker limit.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run one admission pass and spawn a worker per admitted task.
    ///
    /// Must be called from within a tokio runtime. Returns how many tasks
    /// were admitted.
    #[must_use]
    pub fn admit_queued(&self) -> usize {
        admit(&self.store, self.max_workers, self.worker, &self.shutdown)
    }

    /// Start the tick loop. It stops when [`shutdown`](Self::shutdown) is
    /// called or the scheduler is dropped.
    #[must_use]
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let max_workers = self.max_workers;
        let worker = self.worker;
        let tick_interval = self.tick_interval;
        let shutdown = self.shutdown.clone();

        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!(
                    max_workers,
                    tick_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
                    "scheduler loop started"
                );

                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            info!("scheduler loop shutting down");
                            break;
                        }
                        _ = ticker.tick() => {}
                    }

                    let admitted = admit(&store, max_workers, worker, &shutdown);
                    if admitted > 0 {
                        debug!(admitted, "tick admitted tasks");
                    }
                }
            }
            .instrument(info_span!("scheduler")),
        )
    }

    /// Follow `task_id` until it reaches a terminal status.
    ///
    /// Every snapshot of the task read from `updates` is handed to
    /// `on_snapshot`. Because a full subscriber channel drops snapshots, the
    /// store is also re-read every tick, and whichever source first shows a
    /// terminal status ends the follow. The terminal snapshot is always
    /// passed to `on_snapshot` exactly once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task is removed while being
    /// followed, or the first error returned by `on_snapshot`.
    pub async fn follow<F>(
        &self,
        updates: &mut TaskUpdates,
        task_id: &str,
        mut on_snapshot: F,
    ) -> Result<Task>
    where
        F: FnMut(&Task) -> Result<()>,
    {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stream_open = true;

        loop {
            let snapshot = tokio::select! {
                update = updates.recv_for(task_id), if stream_open => {
                    let Some(snapshot) = update else {
                        // Keep polling the store.
                        stream_open = false;
                        continue;
                    };
                    snapshot
                }
                _ = ticker.tick() => {
                    let current = self.store.get(task_id)?;
                    if !current.status.is_terminal() {
                        continue;
                    }
                    debug!(task_id, status = ?current.status, "terminal status read from store");
                    current
                }
            };

            on_snapshot(&snapshot)?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
        }
    }

    /// Stop the tick loop and cancel every running worker.
    ///
    /// Workers observe the cancellation and leave task status untouched.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn admit(
    store: &Arc<TaskStore>,
    max_workers: usize,
    worker: WorkerSettings,
    shutdown: &CancellationToken,
) -> usize {
    if shutdown.is_cancelled() {
        return 0;
    }

    let admissions = store.take_admissions(max_workers, shutdown);
    let count = admissions.len();
    for admission in admissions {
        // Detached: the worker reports through the store.
        drop(spawn_worker(Arc::clone(store), admission, worker));
    }
    count
}
