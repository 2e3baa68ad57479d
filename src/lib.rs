pub mod config;
pub mod daemon;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod source;
pub mod worker;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{DaemonError, Result};
