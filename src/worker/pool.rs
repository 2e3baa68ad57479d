use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{panic_message, Result};
use crate::scheduler::{JobHandle, JobQueue, JobStatus};
use crate::worker::executor::{ExecutionRequest, Executor};

/// A single queue consumer.
pub struct Worker<J, E> {
    id: usize,
    queue: JobQueue<J>,
    executor: Arc<E>,
    heartbeat_interval: Duration,
}

impl<J: JobHandle, E: Executor> Worker<J, E> {
    pub fn new(id: usize, queue: JobQueue<J>, executor: Arc<E>, heartbeat_interval: Duration) -> Self {
        Self {
            id,
            queue,
            executor,
            heartbeat_interval,
        }
    }

    /// Process jobs until `shutdown` is cancelled while idle.
    ///
    /// A job that is already executing is never interrupted.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Worker started");
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.queue.withdraw() => next,
            };
            let Some(mut job) = next else {
                break;
            };
            self.handle(&mut job).await;
        }
        tracing::info!("Worker stopped");
    }

    /// Run one job inside the per-job isolation boundary.
    ///
    /// Failures reported by the executor become an `Error` status. Anything
    /// else that escapes, a failed status update or a panic, is logged as
    /// critical and leaves the job `Stuck`; the worker itself carries on.
    pub async fn handle(&self, job: &mut J) -> Option<JobStatus> {
        let job_id = job.id();
        let failure = match AssertUnwindSafe(self.process(job)).catch_unwind().await {
            Ok(Ok(status)) => return Some(status),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
        };

        tracing::error!(
            critical = true,
            worker = self.id,
            job_id = %job_id,
            error = %failure,
            "Unknown error in worker"
        );

        job.stop_heartbeat();
        if let Err(e) = job.set_status(JobStatus::Stuck) {
            tracing::error!(job_id = %job_id, error = %e, "Could not mark job as stuck");
        }
        None
    }

    async fn process(&self, job: &mut J) -> Result<JobStatus> {
        job.set_status(JobStatus::Working)?;
        job.stop_heartbeat();

        let span = job.span();
        let result = {
            let _beat = job.beat(self.heartbeat_interval);
            let request = ExecutionRequest {
                job_id: job.id(),
                input_files: job.input_files(),
                output_dir: job.output_dir(),
                work_dir: job.output_dir(),
            };
            self.executor
                .execute(request)
                .instrument(span.clone())
                .await
        };

        match result {
            Ok(outputs) => {
                span.in_scope(|| tracing::info!(outputs = outputs.len(), "Job succeeded"));
                job.report_success(outputs)?;
                Ok(JobStatus::Success)
            }
            Err(e) => {
                span.in_scope(|| tracing::warn!(error = %e, "Job failed"));
                job.report_error(&e.to_string())?;
                Ok(JobStatus::Error)
            }
        }
    }
}

/// Fixed set of workers sharing one queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<J: JobHandle, E: Executor>(
        num_workers: usize,
        queue: JobQueue<J>,
        executor: Arc<E>,
        heartbeat_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let handles = (0..num_workers)
            .map(|id| {
                let worker = Worker::new(id, queue.clone(), executor.clone(), heartbeat_interval);
                let span = tracing::info_span!("worker", name = %format!("worker-{id}"));
                tokio::spawn(worker.run(shutdown.clone()).instrument(span))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }
}
