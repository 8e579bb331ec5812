//! Authoritative task table and pending queue.
//!
//! All task mutation goes through [`TaskStore`]. The table, the FIFO queue
//! of task IDs awaiting a worker slot, and the command builder registry sit
//! behind one mutex that is never held across an `.await`, so every public
//! operation returns immediately. Killing a process is signalled through the
//! run's [`CancellationToken`], never waited on.
//!
//! Lifecycle:
//!
//! ```text
//!   enqueue ──▶ Queued ──admit──▶ Downloading ──exit 0──▶ Completed
//!                 │  ▲               │  │  └──exit≠0──▶ Failed
//!                 │  └──resume── Paused ◀─pause┘  │
//!                 │                  │             │
//!                 └──────cancel──────┴───cancel────┴──▶ Cancelled
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::progress::ProgressUpdate;
use crate::models::task::{Task, TaskStatus};
use crate::orchestrator::lock;
use crate::orchestrator::notifier::{Notifier, TaskUpdates};
use crate::providers::CommandBuilder;
use crate::{AppError, Result};

struct TaskEntry {
    task: Task,
    /// Cancellation signal of the current run; `None` unless admitted.
    cancel: Option<CancellationToken>,
}

impl TaskEntry {
    /// Move to `next` if the lifecycle table allows it.
    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.task.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "task {} cannot move from {:?} to {next:?}",
                self.task.id, self.task.status
            )));
        }
        self.task.status = next;
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    tasks: HashMap<String, TaskEntry>,
    queue: VecDeque<String>,
    builders: HashMap<String, CommandBuilder>,
}

impl StoreState {
    fn entry(&self, task_id: &str) -> Result<&TaskEntry> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))
    }

    fn entry_mut(&mut self, task_id: &str) -> Result<&mut TaskEntry> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))
    }

    fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|entry| entry.task.status.occupies_worker())
            .count()
    }
}

/// Everything a worker needs to execute one admitted run.
pub struct Admission {
    /// Task being run.
    pub task_id: String,
    /// Run number; results from older runs are ignored.
    pub attempt: u32,
    /// Provider the builder was resolved for.
    pub provider_id: String,
    /// Item to install.
    pub item_id: String,
    /// Install target.
    pub install_path: PathBuf,
    /// Builder resolved at admission time.
    pub builder: CommandBuilder,
    /// Cancelled by pause, cancel, or scheduler shutdown.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("task_id", &self.task_id)
            .field("attempt", &self.attempt)
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

/// Mutually exclusive task table, queue, and builder registry.
pub struct TaskStore {
    state: Mutex<StoreState>,
    notifier: Notifier,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("TaskStore")
            .field("tasks", &state.tasks.len())
            .field("queued", &state.queue.len())
            .field("providers", &state.builders.len())
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    /// Empty store whose subscribers buffer `update_capacity` snapshots.
    #[must_use]
    pub fn new(update_capacity: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            notifier: Notifier::new(update_capacity),
        }
    }

    /// Register (or replace) the command builder for `provider_id`.
    pub fn register_builder(&self, provider_id: impl Into<String>, builder: CommandBuilder) {
        let provider_id = provider_id.into();
        debug!(provider = provider_id, "command builder registered");
        lock(&self.state).builders.insert(provider_id, builder);
    }

    /// Whether a builder exists for `provider_id`.
    #[must_use]
    pub fn has_builder(&self, provider_id: &str) -> bool {
        lock(&self.state).builders.contains_key(provider_id)
    }

    /// Registered provider IDs, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = lock(&self.state).builders.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Observe every task state change from now on.
    #[must_use]
    pub fn subscribe(&self) -> TaskUpdates {
        self.notifier.subscribe()
    }

    /// The notifier backing [`subscribe`](Self::subscribe).
    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Create a queued task and append it to the queue tail.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Duplicate` if a non-terminal task already exists
    /// for the same `(item_id, provider_id)`.
    pub fn enqueue(
        &self,
        item_id: &str,
        title: &str,
        provider_id: &str,
        install_path: impl AsRef<Path>,
    ) -> Result<Task> {
        let mut state = lock(&self.state);

        if let Some(existing) = state.tasks.values().find(|entry| {
            entry.task.same_target(item_id, provider_id) && !entry.task.status.is_terminal()
        }) {
            return Err(AppError::Duplicate(format!(
                "{provider_id}/{item_id} already has task {} in status {:?}",
                existing.task.id, existing.task.status
            )));
        }

        let now = Utc::now();
        let mut task = Task::new(
            item_id.to_owned(),
            title.to_owned(),
            provider_id.to_owned(),
            install_path.as_ref().to_path_buf(),
            now,
        );
        let mut nanos = now.timestamp_nanos_opt().unwrap_or_default();
        while state.tasks.contains_key(&task.id) {
            nanos += 1;
            task.id = Task::make_id(provider_id, item_id, nanos);
        }

        info!(task_id = task.id, provider = provider_id, item = item_id, "task queued");

        state.queue.push_back(task.id.clone());
        state.tasks.insert(
            task.id.clone(),
            TaskEntry {
                task: task.clone(),
                cancel: None,
            },
        );
        self.notifier.emit(&task);

        Ok(task)
    }

    /// Snapshot of one task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown ID.
    pub fn get(&self, task_id: &str) -> Result<Task> {
        lock(&self.state).entry(task_id).map(|entry| entry.task.clone())
    }

    /// Snapshots of every known task, unordered.
    #[must_use]
    pub fn list(&self) -> Vec<Task> {
        lock(&self.state)
            .tasks
            .values()
            .map(|entry| entry.task.clone())
            .collect()
    }

    /// Tasks that are queued, downloading, installing, or verifying.
    #[must_use]
    pub fn list_active(&self) -> Vec<Task> {
        lock(&self.state)
            .tasks
            .values()
            .filter(|entry| entry.task.status.is_active())
            .map(|entry| entry.task.clone())
            .collect()
    }

    /// Task IDs waiting for a worker slot, head first.
    #[must_use]
    pub fn queued_ids(&self) -> Vec<String> {
        lock(&self.state).queue.iter().cloned().collect()
    }

    /// Number of task IDs in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Number of tasks occupying a worker slot.
    #[must_use]
    pub fn running_count(&self) -> usize {
        lock(&self.state).running_count()
    }

    /// Stop a downloading task; it can be resumed later.
    ///
    /// This and every other status change in the store go through
    /// [`TaskStatus::can_transition_to`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown ID, or
    /// `AppError::InvalidTransition` unless the task is `Downloading`.
    pub fn pause(&self, task_id: &str) -> Result<Task> {
        let mut state = lock(&self.state);
        let entry = state.entry_mut(task_id)?;

        entry.transition(TaskStatus::Paused)?;
        if let Some(cancel) = entry.cancel.take() {
            cancel.cancel();
        }
        entry.task.speed_bps = 0;

        info!(task_id, "task paused");
        self.notifier.emit(&entry.task);
        Ok(entry.task.clone())
    }

    /// Re-queue a paused task at the queue tail.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown ID, or
    /// `AppError::InvalidTransition` unless the task is `Paused`.
    pub fn resume(&self, task_id: &str) -> Result<Task> {
        let mut state = lock(&self.state);
        let entry = state.entry_mut(task_id)?;

        entry.transition(TaskStatus::Queued)?;
        let snapshot = entry.task.clone();
        state.queue.push_back(task_id.to_owned());

        info!(task_id, "task resumed");
        self.notifier.emit(&snapshot);
        Ok(snapshot)
    }

    /// Cancel a task from any non-terminal status.
    ///
    /// A running process is signalled to stop; a queued task is removed
    /// from the queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown ID, or
    /// `AppError::InvalidTransition` if the task is already terminal.
    pub fn cancel(&self, task_id: &str) -> Result<Task> {
        let mut state = lock(&self.state);
        let entry = state.entry_mut(task_id)?;

        entry.transition(TaskStatus::Cancelled)?;
        if let Some(cancel) = entry.cancel.take() {
            cancel.cancel();
        }
        entry.task.speed_bps = 0;
        let snapshot = entry.task.clone();
        state.queue.retain(|id| id != task_id);

        info!(task_id, "task cancelled");
        self.notifier.emit(&snapshot);
        Ok(snapshot)
    }

    /// Delete a terminal task from the table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown ID, or
    /// `AppError::Conflict` if the task is not terminal.
    pub fn remove(&self, task_id: &str) -> Result<Task> {
        let mut state = lock(&self.state);
        let status = state.entry(task_id)?.task.status;

        if !status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "cannot remove task {task_id} while {status:?}"
            )));
        }

        let entry = state
            .tasks
            .remove(task_id)
            .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))?;
        debug!(task_id, "task removed");
        Ok(entry.task)
    }

    /// Pop queued tasks into worker slots while fewer than `max_workers`
    /// tasks are running.
    ///
    /// Queue entries whose task is no longer `Queued` are skipped. Tasks
    /// whose provider has no builder fail immediately without using a slot.
    /// Each admitted task moves to `Downloading` here, under the lock, so
    /// the running count is exact for the next call.
    #[must_use]
    pub fn take_admissions(
        &self,
        max_workers: usize,
        parent: &CancellationToken,
    ) -> Vec<Admission> {
        let mut state = lock(&self.state);
        let mut running = state.running_count();
        let mut admitted = Vec::new();

        while running < max_workers {
            let Some(task_id) = state.queue.pop_front() else {
                break;
            };
            let Some(queued) = state
                .tasks
                .get(&task_id)
                .filter(|entry| entry.task.status == TaskStatus::Queued)
            else {
                debug!(task_id, "skipping queue entry that is no longer queued");
                continue;
            };
            let builder = state.builders.get(&queued.task.provider_id).cloned();
            let Some(entry) = state.tasks.get_mut(&task_id) else {
                continue;
            };

            let Some(builder) = builder else {
                let message = format!(
                    "no command builder registered for provider: {}",
                    entry.task.provider_id
                );
                if let Err(err) = entry.transition(TaskStatus::Failed) {
                    warn!(%err, "admission failure rejected");
                    continue;
                }
                warn!(task_id, provider = entry.task.provider_id, "{message}");
                entry.task.error = Some(message);
                self.notifier.emit(&entry.task);
                continue;
            };

            if let Err(err) = entry.transition(TaskStatus::Downloading) {
                warn!(%err, "admission rejected");
                continue;
            }
            let cancel = parent.child_token();
            entry.task.attempt += 1;
            entry.task.error = None;
            entry.task.started_at = Some(Utc::now());
            entry.task.completed_at = None;
            entry.cancel = Some(cancel.clone());

            info!(task_id, attempt = entry.task.attempt, "task admitted");
            self.notifier.emit(&entry.task);

            admitted.push(Admission {
                task_id: task_id.clone(),
                attempt: entry.task.attempt,
                provider_id: entry.task.provider_id.clone(),
                item_id: entry.task.item_id.clone(),
                install_path: entry.task.install_path.clone(),
                builder,
                cancel,
            });
            running += 1;
        }

        admitted
    }

    /// Apply one parsed output line to the run `attempt` of `task_id`.
    ///
    /// Emits a snapshot even when `update` recognized nothing. Lines from a
    /// run that is no longer current are ignored.
    pub fn apply_progress(&self, task_id: &str, attempt: u32, update: &ProgressUpdate) {
        let mut state = lock(&self.state);
        let Some(entry) = state.tasks.get_mut(task_id) else {
            return;
        };
        if entry.task.attempt != attempt || !in_run(entry.task.status) {
            return;
        }

        entry.task.apply_progress(update);
        self.notifier.emit(&entry.task);
    }

    /// Record how run `attempt` of `task_id` ended.
    ///
    /// Does nothing when `cancel` has fired: whoever cancelled the run
    /// already set the task's status.
    pub fn finish_run(
        &self,
        task_id: &str,
        attempt: u32,
        outcome: Result<()>,
        cancel: &CancellationToken,
    ) {
        let mut state = lock(&self.state);

        if cancel.is_cancelled() {
            debug!(task_id, attempt, "run was cancelled, leaving status untouched");
            return;
        }

        let Some(entry) = state.tasks.get_mut(task_id) else {
            return;
        };
        if entry.task.attempt != attempt {
            return;
        }
        let next = if outcome.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if let Err(err) = entry.transition(next) {
            debug!(%err, "ignoring exit of a task that left its run");
            return;
        }

        entry.cancel = None;
        entry.task.speed_bps = 0;
        match outcome {
            Ok(()) => {
                entry.task.progress = 100.0;
                entry.task.eta_seconds = 0;
                entry.task.completed_at = Some(Utc::now());
                info!(task_id, "task completed");
            }
            Err(err) => {
                let message = err.to_string();
                warn!(task_id, error = message.as_str(), "task failed");
                entry.task.error = Some(message);
            }
        }

        self.notifier.emit(&entry.task);
    }
}

fn in_run(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Downloading | TaskStatus::Installing | TaskStatus::Verifying
    )
}
