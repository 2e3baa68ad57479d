use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

pub const DEFAULT_CAPACITY: usize = 5;

/// Why a job was not admitted. The job is handed back to the caller.
#[derive(Debug)]
pub enum Rejected<J> {
    /// `capacity` jobs are already waiting.
    Full(J),
    /// Every consumer is gone.
    Closed(J),
}

impl<J> Rejected<J> {
    pub fn into_job(self) -> J {
        match self {
            Rejected::Full(job) | Rejected::Closed(job) => job,
        }
    }
}

/// Fixed-capacity FIFO of admitted jobs shared by the intake loop and the
/// worker pool.
///
/// Admission never waits: when `capacity` jobs are already waiting the job
/// is handed back as [`Rejected::Full`]. Withdrawal waits until a job is
/// available. Clones refer to the same queue.
#[derive(Debug)]
pub struct JobQueue<J> {
    tx: mpsc::Sender<J>,
    rx: Arc<Mutex<mpsc::Receiver<J>>>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<J> Default for JobQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J> JobQueue<J> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is zero. `DaemonConfig::validate` rejects that
    /// before a queue is built.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Admit `job` without waiting.
    pub fn try_admit(&self, job: J) -> Result<(), Rejected<J>> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => Rejected::Full(job),
            mpsc::error::TrySendError::Closed(job) => Rejected::Closed(job),
        })
    }

    /// Wait for the oldest admitted job.
    ///
    /// Waiting consumers are served in the order they started waiting.
    pub async fn withdraw(&self) -> Option<J> {
        self.rx.lock().await.recv().await
    }

    /// Take the oldest admitted job if one is waiting right now.
    pub fn try_withdraw(&self) -> Option<J> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of jobs currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}
