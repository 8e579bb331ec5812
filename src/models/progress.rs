//! Normalized progress extracted from one line of provider output.

use serde::{Deserialize, Serialize};

/// Fields recognized in a single output line. `None` means the line did
/// not carry that token and the task keeps its previous value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProgressUpdate {
    /// Percentage complete, 0 to 100.
    pub percent: Option<f64>,
    /// Transfer speed in bytes per second.
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining.
    pub eta_seconds: Option<u64>,
    /// Bytes downloaded so far.
    pub downloaded_bytes: Option<u64>,
    /// Total bytes to download.
    pub total_bytes: Option<u64>,
}

impl ProgressUpdate {
    /// True when no field was recognized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.percent.is_none()
            && self.speed_bps.is_none()
            && self.eta_seconds.is_none()
            && self.downloaded_bytes.is_none()
            && self.total_bytes.is_none()
    }
}
