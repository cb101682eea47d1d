//! # Scan Job State Machine
//!
//! Tracks the lifecycle of one scan with validated state transitions.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed
//!     ↓         ↓
//!     └──────→ Failed
//!     └──────→ Cancelled
//! ```
//!
//! Transitions consume the job and return the updated one, so an illegal
//! transition is caught where it happens rather than surfacing later as a
//! stuck job.

use crate::error::{Result, ScanError};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanJobId(Uuid);

impl ScanJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScanJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The current status of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ScanStatus {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(ScanError::InvalidTransition {
                from: other.to_string(),
                to: "?".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a scan rebuilds the whole index or only a dirtied subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Full,
    Incremental,
}

/// Counters accumulated while a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStats {
    pub files_seen: u64,
    pub tracks_added: u64,
    pub files_skipped: u64,
    pub dirs_scanned: u64,
    pub rows_removed: u64,
}

/// One scan's lifecycle record.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub id: ScanJobId,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub stats: ScanStats,
    /// Subdirectories found below the scan roots, posted back on completion
    /// so the directory watch set can be extended.
    pub discovered_dirs: Vec<PathBuf>,
    pub error: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl ScanJob {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            id: ScanJobId::new(),
            scan_type,
            status: ScanStatus::Pending,
            stats: ScanStats::default(),
            discovered_dirs: Vec::new(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(mut self, from: &[ScanStatus], to: ScanStatus) -> Result<Self> {
        if !from.contains(&self.status) {
            return Err(ScanError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(self)
    }

    /// Begin running.
    pub fn start(self) -> Result<Self> {
        let mut job = self.transition(&[ScanStatus::Pending], ScanStatus::Running)?;
        job.started_at = Some(chrono::Utc::now().timestamp());
        Ok(job)
    }

    /// Finish successfully.
    pub fn complete(self, stats: ScanStats, discovered_dirs: Vec<PathBuf>) -> Result<Self> {
        let mut job = self.transition(&[ScanStatus::Running], ScanStatus::Completed)?;
        job.stats = stats;
        job.discovered_dirs = discovered_dirs;
        job.finished_at = Some(chrono::Utc::now().timestamp());
        Ok(job)
    }

    /// Finish with an error.
    pub fn fail(self, message: impl Into<String>) -> Result<Self> {
        let mut job = self.transition(
            &[ScanStatus::Pending, ScanStatus::Running],
            ScanStatus::Failed,
        )?;
        job.error = Some(message.into());
        job.finished_at = Some(chrono::Utc::now().timestamp());
        Ok(job)
    }

    /// Finish after a cooperative abort. No completion results are kept.
    pub fn cancel(self) -> Result<Self> {
        let mut job = self.transition(
            &[ScanStatus::Pending, ScanStatus::Running],
            ScanStatus::Cancelled,
        )?;
        job.finished_at = Some(chrono::Utc::now().timestamp());
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let job = ScanJob::new(ScanType::Full);
        assert_eq!(job.status, ScanStatus::Pending);

        let job = job.start().unwrap();
        assert_eq!(job.status, ScanStatus::Running);
        assert!(job.started_at.is_some());

        let stats = ScanStats {
            files_seen: 10,
            tracks_added: 9,
            files_skipped: 1,
            dirs_scanned: 2,
            rows_removed: 0,
        };
        let job = job.complete(stats, vec![PathBuf::from("/music/sub")]).unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert!(job.status.is_terminal());
        assert_eq!(job.stats.tracks_added, 9);
        assert_eq!(job.discovered_dirs.len(), 1);
    }

    #[test]
    fn completing_a_pending_job_is_invalid() {
        let job = ScanJob::new(ScanType::Full);
        let result = job.complete(ScanStats::default(), Vec::new());
        assert!(matches!(result, Err(ScanError::InvalidTransition { .. })));
    }

    #[test]
    fn cancel_from_pending_and_running() {
        let job = ScanJob::new(ScanType::Incremental);
        let job = job.cancel().unwrap();
        assert_eq!(job.status, ScanStatus::Cancelled);

        let job = ScanJob::new(ScanType::Incremental).start().unwrap();
        let job = job.cancel().unwrap();
        assert_eq!(job.status, ScanStatus::Cancelled);

        // Terminal states stay terminal.
        assert!(job.cancel().is_err());
    }

    #[test]
    fn fail_records_message() {
        let job = ScanJob::new(ScanType::Full).start().unwrap();
        let job = job.fail("disk unplugged").unwrap();
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("disk unplugged"));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
            ScanStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ScanStatus>().unwrap(), status);
        }
    }
}
