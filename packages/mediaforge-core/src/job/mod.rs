//! Job data model, queue, and manager: the core pipeline that turns a
//! submitted operation into a supervised transcode and a routed result.

pub mod manager;
pub mod model;
pub mod queue;

pub use manager::{JobManager, JobManagerStats};
pub use model::{Job, JobStatus, Operation};
pub use queue::{JobQueue, QueueEntry};
