//! Producers of job handles.
//!
//! A [`JobSource`] yields jobs one at a time, waiting until the next one
//! is available. The daemon's sources are effectively infinite; a source
//! that returns `None` ends the intake loop.
//!
//! - [`DirectoryListener`]: discovers request directories on disk
//! - `tokio::sync::mpsc::UnboundedReceiver<J>`: in-process producers

use std::future::Future;

use tokio::sync::mpsc;

use crate::scheduler::JobHandle;

pub mod fs;

pub use fs::{read_request, submit_request, DirectoryListener, FsJob, RequestReport};

pub trait JobSource: Send + 'static {
    type Job: JobHandle;

    /// Wait for the next job. `None` means the source is exhausted.
    fn next_job(&mut self) -> impl Future<Output = Option<Self::Job>> + Send;
}

impl<J: JobHandle> JobSource for mpsc::UnboundedReceiver<J> {
    type Job = J;

    async fn next_job(&mut self) -> Option<J> {
        self.recv().await
    }
}
