//! Per-task worker: runs one provider process to completion.
//!
//! The worker builds the invocation, spawns the child, attaches a reader to
//! each output stream, and waits for either process exit or cancellation.
//! Cancellation kills the child and the worker then leaves the task alone,
//! because pause or cancel already set its status. Otherwise the exit
//! status decides between `Completed` and `Failed`.

use std::panic::{self, AssertUnwindSafe};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::progress::ProgressUpdate;
use crate::orchestrator::store::{Admission, TaskStore};
use crate::process::reader::{run_reader, OutputStream};
use crate::process::spawner::spawn_process;
use crate::providers::ProcessInvocation;
use crate::{AppError, Result};

/// Tunables shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Output lines longer than this are discarded.
    pub max_line_bytes: usize,
    /// How long to let readers drain after the process exits.
    pub reader_drain: Duration,
}

/// Spawn a worker task for `admission`.
#[must_use]
pub fn spawn_worker(
    store: Arc<TaskStore>,
    admission: Admission,
    settings: WorkerSettings,
) -> JoinHandle<()> {
    let span = info_span!(
        "worker",
        task_id = admission.task_id.as_str(),
        provider = admission.provider_id.as_str(),
        attempt = admission.attempt
    );
    tokio::spawn(run_worker(store, admission, settings).instrument(span))
}

/// Execute one admitted run and record its outcome on the store.
pub async fn run_worker(store: Arc<TaskStore>, admission: Admission, settings: WorkerSettings) {
    let Admission {
        task_id,
        attempt,
        item_id,
        install_path,
        builder,
        cancel,
        ..
    } = admission;

    if cancel.is_cancelled() {
        debug!(task_id, "run cancelled before start");
        return;
    }

    let built = panic::catch_unwind(AssertUnwindSafe(|| {
        builder(item_id.as_str(), install_path.as_path())
    }));
    let Ok(invocation) = built else {
        let err = AppError::Spawn("command builder panicked".into());
        store.finish_run(&task_id, attempt, Err(err), &cancel);
        return;
    };

    let outcome = execute(&store, &task_id, attempt, &invocation, settings, &cancel).await;
    store.finish_run(&task_id, attempt, outcome, &cancel);
}

async fn execute(
    store: &Arc<TaskStore>,
    task_id: &str,
    attempt: u32,
    invocation: &ProcessInvocation,
    settings: WorkerSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    debug!(task_id, command = %invocation, "starting provider process");
    let mut child = spawn_process(task_id, invocation)?;

    let readers_cancel = cancel.child_token();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(attach_reader(
            store,
            task_id,
            attempt,
            OutputStream::Stdout,
            stdout,
            settings,
            &readers_cancel,
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(attach_reader(
            store,
            task_id,
            attempt,
            OutputStream::Stderr,
            stderr,
            settings,
            &readers_cancel,
        ));
    }

    let status = tokio::select! {
        status = child.wait() => status,
        () = cancel.cancelled() => {
            info!(task_id, "run cancelled, killing provider process");
            if let Err(err) = child.start_kill() {
                debug!(task_id, %err, "kill failed, process likely already exited");
            }
            child.wait().await
        }
    };

    drain_readers(task_id, readers, settings.reader_drain, &readers_cancel).await;

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(AppError::Process(describe_exit(status))),
        Err(err) => Err(AppError::Process(format!("failed to wait for process: {err}"))),
    }
}

fn attach_reader<R>(
    store: &Arc<TaskStore>,
    task_id: &str,
    attempt: u32,
    stream: OutputStream,
    output: R,
    settings: WorkerSettings,
    cancel: &CancellationToken,
) -> JoinHandle<usize>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let store = Arc::clone(store);
    let sink_task_id = task_id.to_owned();
    let sink = move |update: ProgressUpdate| {
        store.apply_progress(&sink_task_id, attempt, &update);
    };
    tokio::spawn(
        run_reader(
            task_id.to_owned(),
            stream,
            output,
            settings.max_line_bytes,
            sink,
            cancel.clone(),
        )
        .in_current_span(),
    )
}

/// Let readers consume buffered output; stop them if they outlive `grace`
/// (a grandchild may still hold the pipe open).
async fn drain_readers(
    task_id: &str,
    readers: Vec<JoinHandle<usize>>,
    grace: Duration,
    cancel: &CancellationToken,
) {
    let join_all = async {
        let mut lines = 0usize;
        for reader in readers {
            match reader.await {
                Ok(count) => lines += count,
                Err(err) => warn!(task_id, %err, "output reader task failed"),
            }
        }
        lines
    };
    tokio::pin!(join_all);

    if let Ok(lines) = tokio::time::timeout(grace, &mut join_all).await {
        debug!(task_id, lines, "output readers drained");
        return;
    }

    warn!(task_id, "output readers still open after process exit, stopping them");
    cancel.cancel();
    let lines = join_all.await;
    debug!(task_id, lines, "output readers stopped");
}

/// Human-readable exit description used as the task's error text.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "process terminated by signal".to_owned(),
        |code| format!("process exited with code {code}"),
    )
}
