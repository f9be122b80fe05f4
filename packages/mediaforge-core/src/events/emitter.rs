//! Event emitter abstraction for decoupling the job manager from any one
//! logging/transport implementation.

use super::JobLifecyclePhase;
use crate::job::model::JobStatus;

/// Trait for emitting ambient job-lifecycle observability, independent of the
/// per-session `JobEvent` routed back to a specific client.
///
/// Per the design notes: "every component logs at a level appropriate to its
/// event... rather than inventing a second channel for operational
/// visibility" - this trait exists so the job manager doesn't call `log::`
/// directly and so tests can substitute a counting implementation.
pub trait EventEmitter: Send + Sync {
    /// A job crossed into `phase`. `status` is its new status when the phase
    /// implies one (`Started` -> `downloading`, `Completed` -> `completed`, etc).
    fn emit_job_lifecycle(&self, job_id: &str, phase: JobLifecyclePhase, status: JobStatus);
}

/// Discards all events. Useful in tests that don't care about logging.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_job_lifecycle(&self, _job_id: &str, _phase: JobLifecyclePhase, _status: JobStatus) {}
}

/// Logs each lifecycle event at a level appropriate to its severity:
/// submission/progress at info/debug, failures at warn.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_job_lifecycle(&self, job_id: &str, phase: JobLifecyclePhase, status: JobStatus) {
        match phase {
            JobLifecyclePhase::Submitted | JobLifecyclePhase::Started => {
                log::info!("[job {job_id}] {phase:?} -> {status:?}");
            }
            JobLifecyclePhase::Completed => {
                log::info!("[job {job_id}] completed");
            }
            JobLifecyclePhase::Failed => {
                log::warn!("[job {job_id}] failed");
            }
            JobLifecyclePhase::Cancelled => {
                log::info!("[job {job_id}] cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEventEmitter {
        count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_job_lifecycle(&self, _job_id: &str, _phase: JobLifecyclePhase, _status: JobStatus) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_calls() {
        let emitter = CountingEventEmitter {
            count: AtomicUsize::new(0),
        };
        emitter.emit_job_lifecycle("j1", JobLifecyclePhase::Submitted, JobStatus::Queued);
        emitter.emit_job_lifecycle("j1", JobLifecyclePhase::Completed, JobStatus::Completed);
        assert_eq!(emitter.count.load(Ordering::SeqCst), 2);
    }
}
