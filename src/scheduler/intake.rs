use std::panic::AssertUnwindSafe;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{panic_message, DaemonError, Result};
use crate::scheduler::job::{JobHandle, JobStatus};
use crate::scheduler::queue::{JobQueue, Rejected};
use crate::source::JobSource;

/// Outcome of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The queue was full; the job has been failed with a capacity error.
    Rejected,
}

/// Drains a [`JobSource`] into the bounded queue.
///
/// Admission never waits for space: a job arriving at a full queue is
/// failed on the spot. A failure while handling one job is logged and the
/// loop moves on to the next.
pub struct IntakeLoop<S: JobSource> {
    source: S,
    queue: JobQueue<S::Job>,
    heartbeat_interval: Duration,
}

impl<S: JobSource> IntakeLoop<S> {
    pub fn new(source: S, queue: JobQueue<S::Job>, heartbeat_interval: Duration) -> Self {
        Self {
            source,
            queue,
            heartbeat_interval,
        }
    }

    /// Run until the source is exhausted or `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(capacity = self.queue.capacity(), "Intake loop started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Intake loop shutting down");
                    break;
                }
                next = self.source.next_job() => next,
            };
            let Some(job) = next else {
                tracing::info!("Job stream ended");
                break;
            };

            let job_id = job.id();
            let queue = &self.queue;
            let interval = self.heartbeat_interval;
            match std::panic::catch_unwind(AssertUnwindSafe(|| admit(queue, job, interval))) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        critical = true,
                        job_id = %job_id,
                        error = %e,
                        "Unknown exception in intake loop"
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        critical = true,
                        job_id = %job_id,
                        panic = %panic_message(payload.as_ref()),
                        "Intake loop panicked while handling job"
                    );
                }
            }
        }
    }
}

/// Mark `job` as waiting, start its heartbeat and try to enqueue it.
///
/// On a full queue the heartbeat is stopped again and the job is failed
/// with [`DaemonError::Capacity`].
pub fn admit<J: JobHandle>(
    queue: &JobQueue<J>,
    mut job: J,
    heartbeat_interval: Duration,
) -> Result<Admission> {
    job.set_status(JobStatus::Waiting)?;
    job.start_heartbeat(heartbeat_interval);

    let job_id = job.id();
    tracing::info!(job_id = %job_id, queued = queue.len(), "Adding job to queue");

    match queue.try_admit(job) {
        Ok(()) => Ok(Admission::Admitted),
        Err(Rejected::Full(mut job)) => {
            job.stop_heartbeat();
            tracing::error!(job_id = %job_id, "Queue is full, rejecting job");
            job.report_error(&DaemonError::Capacity.to_string())?;
            Ok(Admission::Rejected)
        }
        Err(Rejected::Closed(job)) => {
            job.stop_heartbeat();
            Err(DaemonError::Unknown(format!(
                "job queue closed while admitting {}",
                job.id()
            )))
        }
    }
}
