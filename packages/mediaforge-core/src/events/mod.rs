//! Job lifecycle events: the domain-level vocabulary routed from worker
//! fibers back to the owning connection session, plus an `EventEmitter`
//! trait for ambient observability that isn't tied to any one session.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::job::model::JobStatus;

/// A job-lifecycle event destined for the owning session's serialized writer.
///
/// This is the domain vocabulary; the protocol layer (`crate::protocol`)
/// projects each variant into the wire-level `OutboundMessage` envelope.
#[derive(Debug, Clone, Serialize)]
pub enum JobEvent {
    /// Emitted once, immediately after `submit` accepts a job.
    Ack { job_id: String, message: String },
    /// Emitted as the job progresses; `percentage` is non-decreasing within
    /// a status (see `Job::set_progress`).
    Progress {
        job_id: String,
        percentage: u8,
        stage: JobStatus,
        processing_log: Option<String>,
    },
    /// Terminal success: carries the probed output metadata plus the
    /// artifact bytes read into memory while `work_dir` still existed, so the
    /// session can emit the binary frame without racing the manager's
    /// scoped-acquisition cleanup (invariant 1). The binary artifact frame
    /// follows this event, never precedes it.
    Completed {
        job_id: String,
        output_metadata: serde_json::Value,
        message: String,
        artifact_filename: String,
        #[serde(skip)]
        artifact_bytes: bytes::Bytes,
    },
    /// Terminal failure/cancellation, or a protocol-level fault not tied to
    /// any job (`job_id: None`).
    Error {
        job_id: Option<String>,
        code: &'static str,
        message: String,
        details: Option<String>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Ack { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. } => Some(job_id.as_str()),
            Self::Error { job_id, .. } => job_id.as_deref(),
        }
    }

    /// True for `Completed`/`Error` - the one terminal event a job ever emits
    /// (invariant 3: exactly one of `completed`/`error` per job id).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// Per-session channel a worker fiber routes a job's events through. Kept as
/// an unbounded sender so a worker is never blocked delivering progress -
/// the session's write-serialization, not this channel, is the backpressure
/// point for the outbound socket itself.
pub type JobEventSender = mpsc::UnboundedSender<JobEvent>;
pub type JobEventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Coarse category used by the `EventEmitter` trait for ambient logging,
/// independent of any session's routed `JobEvent` stream.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLifecyclePhase {
    Submitted,
    Started,
    Completed,
    Failed,
    Cancelled,
}
