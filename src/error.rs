use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::JobStatus;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Compute node overloaded")]
    Capacity,

    #[error("{0}")]
    Input(String),

    #[error("Invalid parameter file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Execution(String),

    #[error("Invalid status transition from {from:?} to {to}")]
    InvalidTransition {
        from: Option<JobStatus>,
        to: JobStatus,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DaemonError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DaemonError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or(payload.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload")
        .to_string()
}
