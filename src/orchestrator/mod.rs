//! Task orchestration: the task store, the scheduler loop, per-task
//! workers, and the update notifier.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod worker;

/// Acquire `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this module is a handful of field writes, so a
/// poisoned guard still holds a consistent table.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("task store lock was poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}
