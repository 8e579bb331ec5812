#![forbid(unsafe_code)]

//! Concurrent install queue for store provider CLIs.
//!
//! Tasks are enqueued on a [`TaskStore`], admitted by the [`Scheduler`] up to
//! a worker limit, and executed as child processes whose output is parsed
//! into progress updates and broadcast to [`TaskUpdates`] subscribers.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod providers;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use models::progress::ProgressUpdate;
pub use models::task::{Task, TaskStatus};
pub use orchestrator::notifier::TaskUpdates;
pub use orchestrator::scheduler::Scheduler;
pub use orchestrator::store::TaskStore;
pub use providers::{command_builder, CommandBuilder, ProcessInvocation};
