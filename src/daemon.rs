use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::scheduler::{IntakeLoop, JobQueue};
use crate::source::{DirectoryListener, JobSource};
use crate::worker::{AnalysisExecutor, Executor, WorkerPool};

/// Wires a job source, the bounded queue and the worker pool together.
pub struct Daemon<S, E> {
    config: DaemonConfig,
    source: S,
    executor: Arc<E>,
}

impl Daemon<DirectoryListener, AnalysisExecutor> {
    /// Daemon listening on `config.listener.listen_dir` and running
    /// `config.tool` for every request.
    pub fn from_config(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        let listener = DirectoryListener::new(&config.listener)?;
        let executor = AnalysisExecutor::new(config.tool.clone());
        Self::new(config, listener, executor)
    }
}

impl<S: JobSource, E: Executor> Daemon<S, E> {
    pub fn new(config: DaemonConfig, source: S, executor: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            executor: Arc::new(executor),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Starts the intake loop and `num_workers` workers on a queue of
    /// `queue_capacity` slots. Returns once the intake loop and every worker
    /// have stopped; workers finish the job they are executing first.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            config,
            source,
            executor,
        } = self;

        tracing::info!(
            listen_dir = %config.listener.listen_dir.display(),
            job_pattern = %config.listener.job_pattern,
            queue_capacity = config.queue_capacity,
            num_workers = config.num_workers,
            heartbeat_interval_ms = config.heartbeat_interval_ms,
            tool = %config.tool.binary_path.display(),
            "Starting daemon"
        );

        let queue = JobQueue::with_capacity(config.queue_capacity);

        let intake = IntakeLoop::new(source, queue.clone(), config.heartbeat_interval());
        let intake_handle = tokio::spawn(
            intake
                .run(shutdown.clone())
                .instrument(tracing::info_span!("intake")),
        );

        let pool = WorkerPool::spawn(
            config.num_workers,
            queue,
            executor,
            config.heartbeat_interval(),
            shutdown,
        );
        tracing::info!(workers = pool.len(), "Worker pool started");

        if let Err(e) = intake_handle.await {
            tracing::error!(critical = true, error = %e, "Intake task failed");
        }
        pool.join().await;

        tracing::info!("Daemon stopped");
        Ok(())
    }
}
