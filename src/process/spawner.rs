//! Provider process spawner.
//!
//! Turns a [`ProcessInvocation`] into a running child with piped output
//! streams. Every child is spawned with `kill_on_drop(true)` so a dropped
//! worker never leaks a download process.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::providers::ProcessInvocation;
use crate::{AppError, Result};

/// Build the `tokio` command for an invocation.
#[must_use]
pub fn build_command(invocation: &ProcessInvocation) -> Command {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args);

    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }

    if let Some(dir) = &invocation.current_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Spawn the provider process for `task_id`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS refuses to start the program
/// (missing binary, permission denied, bad working directory).
pub fn spawn_process(task_id: &str, invocation: &ProcessInvocation) -> Result<Child> {
    let child = build_command(invocation).spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn {}: {err}",
            invocation.program.display()
        ))
    })?;

    info!(
        task_id,
        pid = child.id().unwrap_or(0),
        program = %invocation.program.display(),
        "provider process spawned"
    );

    Ok(child)
}
