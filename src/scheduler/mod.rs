pub mod intake;
pub mod job;
pub mod queue;

pub use intake::{admit, Admission, IntakeLoop};
pub use job::{JobHandle, JobStatus, Lifecycle};
pub use queue::{JobQueue, Rejected};
