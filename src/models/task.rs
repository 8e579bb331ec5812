//! Download task model and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::progress::ProgressUpdate;

/// Lifecycle status for a download task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for a worker slot.
    Queued,
    /// Provider process is running.
    Downloading,
    /// Reserved: provider reported an install phase.
    Installing,
    /// Reserved: provider reported a verification phase.
    Verifying,
    /// Stopped by the operator; resumable.
    Paused,
    /// Process exited successfully.
    Completed,
    /// Stopped by the operator; final.
    Cancelled,
    /// Process could not start or exited unsuccessfully.
    Failed,
}

impl TaskStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Queued,
        Self::Downloading,
        Self::Installing,
        Self::Verifying,
        Self::Paused,
        Self::Completed,
        Self::Cancelled,
        Self::Failed,
    ];

    /// `Completed`, `Cancelled` and `Failed` never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Statuses reported by `list_active`.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Downloading | Self::Installing | Self::Verifying
        )
    }

    /// Statuses that occupy a worker slot.
    #[must_use]
    pub fn occupies_worker(self) -> bool {
        matches!(self, Self::Downloading | Self::Installing)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Queued,
                Self::Downloading | Self::Cancelled | Self::Failed
            ) | (
                Self::Downloading,
                Self::Paused
                    | Self::Completed
                    | Self::Failed
                    | Self::Cancelled
                    | Self::Installing
                    | Self::Verifying
            ) | (Self::Installing, Self::Verifying)
                | (
                    Self::Installing | Self::Verifying,
                    Self::Completed | Self::Failed | Self::Cancelled
                )
                | (Self::Paused, Self::Queued | Self::Cancelled)
        )
    }
}

/// A single tracked download/install request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// `{provider}-{item}-{nanos}`; immutable once created.
    pub id: String,
    /// Provider-specific item identifier.
    pub item_id: String,
    /// Display title.
    pub title: String,
    /// Provider identifier used to look up the command builder.
    pub provider_id: String,
    /// Install target directory.
    pub install_path: PathBuf,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Progress percentage, 0 to 100.
    pub progress: f64,
    /// Bytes downloaded so far.
    pub downloaded_bytes: u64,
    /// Total bytes to download.
    pub total_bytes: u64,
    /// Current speed in bytes per second.
    pub speed_bps: u64,
    /// Estimated seconds remaining.
    pub eta_seconds: u64,
    /// Last error message; present only while `Failed`.
    pub error: Option<String>,
    /// When the latest run was admitted.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task completed successfully.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times the task has been admitted to a worker.
    pub attempt: u32,
}

impl Task {
    /// Construct a queued task stamped with `now`.
    #[must_use]
    pub fn new(
        item_id: String,
        title: String,
        provider_id: String,
        install_path: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        let nanos = now.timestamp_nanos_opt().unwrap_or_default();
        Self {
            id: Self::make_id(&provider_id, &item_id, nanos),
            item_id,
            title,
            provider_id,
            install_path,
            status: TaskStatus::Queued,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed_bps: 0,
            eta_seconds: 0,
            error: None,
            started_at: None,
            completed_at: None,
            attempt: 0,
        }
    }

    /// Format a task identifier.
    #[must_use]
    pub fn make_id(provider_id: &str, item_id: &str, nanos: i64) -> String {
        format!("{provider_id}-{item_id}-{nanos}")
    }

    /// Whether this task targets the same item on the same provider.
    #[must_use]
    pub fn same_target(&self, item_id: &str, provider_id: &str) -> bool {
        self.item_id == item_id && self.provider_id == provider_id
    }

    /// Overwrite the fields carried by `update`; absent fields are left as is.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) {
        if let Some(percent) = update.percent {
            self.progress = percent;
        }
        if let Some(speed) = update.speed_bps {
            self.speed_bps = speed;
        }
        if let Some(eta) = update.eta_seconds {
            self.eta_seconds = eta;
        }
        if let Some(downloaded) = update.downloaded_bytes {
            self.downloaded_bytes = downloaded;
        }
        if let Some(total) = update.total_bytes {
            self.total_bytes = total;
        }
    }
}
