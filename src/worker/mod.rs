//! Worker side of the daemon: executing queued jobs.
//!
//! - **Pool**: a fixed number of workers draining the bounded queue
//! - **Execution**: classifying inputs, parsing parameters and running the
//!   analysis tool
//! - **Heartbeat**: per-job liveness timer, paused while a job changes hands
//!
//! # Components
//!
//! - [`WorkerPool`] / [`Worker`]: queue consumers with a per-job isolation
//!   boundary
//! - [`Executor`]: the execution routine; [`AnalysisExecutor`] is the real one
//! - [`InputFileset`]: raw / reference / parameter file classification
//! - [`Heartbeat`] and [`HeartbeatGuard`]: scoped liveness signalling
//!
//! # Execution Flow
//!
//! 1. A worker withdraws the oldest job and marks it `WORKING`
//! 2. The waiting-phase heartbeat is stopped
//! 3. [`Executor::execute`] runs under a [`HeartbeatGuard`]
//! 4. Outputs are attached and the job is marked `SUCCESS`, or the error
//!    message is recorded and the job is marked `ERROR`
//!
//! There is no timeout: a stalled tool keeps its worker busy until it exits.

pub mod executor;
pub mod fileset;
pub mod heartbeat;
pub mod pool;

pub use executor::{AnalysisExecutor, CommandTool, ExecutionRequest, Executor, ToolInvocation, ToolRunner};
pub use fileset::{parse_param_file, InputFileset, InputKind};
pub use heartbeat::{Heartbeat, HeartbeatGuard};
pub use pool::{Worker, WorkerPool};
