#![forbid(unsafe_code)]

//! `install-queue`: queue one install through a store provider CLI and
//! stream its progress as JSON lines.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use install_queue::{AppError, GlobalConfig, Result, Scheduler, Task, TaskStatus};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "install-queue", about = "Concurrent store install queue", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install one item and follow it until it finishes.
    Install {
        /// Provider ID (`epic`, `gog`, `amazon`).
        #[arg(long)]
        provider: String,
        /// Provider-specific item ID.
        #[arg(long)]
        item: String,
        /// Display title; defaults to the item ID.
        #[arg(long)]
        title: Option<String>,
        /// Install target directory.
        #[arg(long)]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(TaskStatus::Completed) => ExitCode::SUCCESS,
        Ok(status) => {
            info!(?status, "task did not complete");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(%err, "install-queue failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<TaskStatus> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(max_workers = config.max_workers, "configuration loaded");

    let scheduler = Scheduler::from_config(&config);
    let mut updates = scheduler.subscribe();
    let loop_handle = scheduler.start();

    let Command::Install {
        provider,
        item,
        title,
        path,
    } = args.command;
    let title = title.unwrap_or_else(|| item.clone());
    let task = scheduler.store().enqueue(&item, &title, &provider, &path)?;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let final_status = tokio::select! {
        () = &mut signal => {
            warn!(task_id = task.id, "shutdown signal received, cancelling task");
            match scheduler.store().cancel(&task.id) {
                Ok(cancelled) => {
                    print_snapshot(&cancelled)?;
                    cancelled.status
                }
                Err(err) => {
                    warn!(%err, "cancel failed");
                    scheduler.store().get(&task.id)?.status
                }
            }
        }
        finished = scheduler.follow(&mut updates, &task.id, print_snapshot) => finished?.status,
    };

    scheduler.shutdown();
    if let Err(err) = loop_handle.await {
        error!(%err, "scheduler loop task failed");
    }
    info!(status = ?final_status, "install-queue shut down");

    Ok(final_status)
}

fn print_snapshot(task: &Task) -> Result<()> {
    let line = serde_json::to_string(task)
        .map_err(|err| AppError::Io(format!("failed to encode task snapshot: {err}")))?;
    println!("{line}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Snapshots own stdout.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
