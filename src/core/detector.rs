use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::ProbeError;

/// `Pending -> Running -> {Complete | Failed | TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStatus {
    Pending,
    Running,
    Complete,
    Failed,
    TimedOut,
}

impl DetectorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            DetectorStatus::Pending => "pending",
            DetectorStatus::Running => "running",
            DetectorStatus::Complete => "complete",
            DetectorStatus::Failed => "failed",
            DetectorStatus::TimedOut => "timeout",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            DetectorStatus::Complete | DetectorStatus::Failed | DetectorStatus::TimedOut
        )
    }
}

impl fmt::Display for DetectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorProgress {
    pub detector_id: usize,
    pub status: DetectorStatus,
    pub issue_count: usize,
    pub error: Option<ProbeError>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorInfo {
    pub id: usize,
    pub script: String,
    pub display_name: String,
    pub description: String,
    pub status: DetectorStatus,
    pub issue_count: usize,
    pub error: Option<ProbeError>,
    pub duration: Option<Duration>,
}

impl DetectorInfo {
    /// Applies a progress event. Events for other detectors, backwards
    /// transitions and anything after a terminal state are ignored.
    pub fn apply(&mut self, progress: &DetectorProgress) -> bool {
        if progress.detector_id != self.id || self.status.is_terminal() {
            return false;
        }
        match progress.status {
            DetectorStatus::Pending => false,
            DetectorStatus::Running => {
                if self.status != DetectorStatus::Pending {
                    return false;
                }
                self.status = DetectorStatus::Running;
                true
            }
            terminal => {
                self.status = terminal;
                self.issue_count = progress.issue_count;
                self.error = progress.error.clone();
                self.duration = Some(progress.duration);
                true
            }
        }
    }
}
