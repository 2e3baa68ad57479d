use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DaemonError, Result};
use crate::worker::heartbeat::{Heartbeat, HeartbeatGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Admitted to the queue, waiting for a worker.
    Waiting,
    /// Owned by a worker, execution in progress.
    Working,
    Success,
    Error,
    /// A failure escaped the worker's per-job handling, either while the
    /// job was being handed over or while it executed. The job will never
    /// reach `Success` or `Error`; external supervisors should treat it as
    /// abandoned.
    Stuck,
}

impl JobStatus {
    /// `Success` and `Error` end the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Waiting, JobStatus::Working)
                | (JobStatus::Waiting, JobStatus::Error)
                | (JobStatus::Working, JobStatus::Success)
                | (JobStatus::Working, JobStatus::Error)
                | (JobStatus::Waiting, JobStatus::Stuck)
                | (JobStatus::Working, JobStatus::Stuck)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Working => "WORKING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Stuck => "STUCK",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "WAITING" => Ok(JobStatus::Waiting),
            "WORKING" => Ok(JobStatus::Working),
            "SUCCESS" => Ok(JobStatus::Success),
            "ERROR" => Ok(JobStatus::Error),
            "STUCK" => Ok(JobStatus::Stuck),
            other => Err(DaemonError::Unknown(format!("unknown job status {other:?}"))),
        }
    }
}

/// Tracks the status of a single job and refuses illegal transitions.
///
/// A fresh lifecycle has no status; the first status must be `Waiting`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifecycle {
    status: Option<JobStatus>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.status
    }

    /// Fail with `InvalidTransition` unless `next` may follow the current
    /// status. Does not change anything.
    pub fn check(&self, next: JobStatus) -> Result<()> {
        let allowed = match self.status {
            None => next == JobStatus::Waiting,
            Some(current) => current.can_transition_to(next),
        };
        if !allowed {
            return Err(DaemonError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }

    /// Move to `next`, returning the previous status.
    ///
    /// Handles that persist their status call [`check`] first and only
    /// advance once the new status is recorded, so a failed write leaves
    /// the previous status in place.
    ///
    /// [`check`]: Lifecycle::check
    pub fn advance(&mut self, next: JobStatus) -> Result<Option<JobStatus>> {
        self.check(next)?;
        Ok(self.status.replace(next))
    }
}

/// Capability interface of a job handle produced by a [`JobSource`].
///
/// Handles are moved, never shared: the intake loop owns a handle until it
/// is admitted, then exactly one worker owns it until a terminal status.
///
/// [`JobSource`]: crate::source::JobSource
pub trait JobHandle: Send + 'static {
    fn id(&self) -> Uuid;

    fn input_files(&self) -> &[PathBuf];

    fn output_dir(&self) -> &Path;

    /// Diagnostic logger for execution-specific detail.
    fn span(&self) -> tracing::Span;

    fn status(&self) -> Option<JobStatus>;

    fn set_status(&mut self, status: JobStatus) -> Result<()>;

    /// Record `message` and move to `Error`.
    fn report_error(&mut self, message: &str) -> Result<()>;

    /// Attach `outputs` and move to `Success`.
    fn report_success(&mut self, outputs: Vec<PathBuf>) -> Result<()>;

    fn outputs(&self) -> &[PathBuf];

    fn heartbeat(&self) -> &Heartbeat;

    fn start_heartbeat(&self, interval: Duration) {
        self.heartbeat().start(interval);
    }

    fn stop_heartbeat(&self) {
        self.heartbeat().stop();
    }

    /// Restart the heartbeat until the returned guard is dropped.
    fn beat(&self, interval: Duration) -> HeartbeatGuard {
        self.heartbeat().guard(interval)
    }
}
