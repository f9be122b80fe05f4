//! Job manager: the bounded worker pool that drains the queue, drives each
//! job through staging, synthesis, supervision, and probing, and routes
//! lifecycle events back to the owning session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::model::{Job, JobError, JobStatus};
use super::queue::{JobQueue, QueueEntry};
use crate::error::MediaForgeError;
use crate::events::{EventEmitter, JobEvent, JobLifecyclePhase};
use crate::runtime::TaskSpawner;
use crate::state::Config;
use crate::{probe, stage, supervisor, synth};

/// Snapshot of manager counters, answering the wire protocol's implicit
/// `stats()` surface (used by the health endpoint and tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct JobManagerStats {
    pub total: usize,
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

pub struct JobManager {
    queue: JobQueue,
    config: Arc<Config>,
    emitter: Arc<dyn EventEmitter>,
    total: AtomicUsize,
    active: AtomicUsize,
}

impl JobManager {
    pub fn new(config: Arc<Config>, emitter: Arc<dyn EventEmitter>) -> Arc<Self> {
        let queue = JobQueue::new(config.queue_capacity);
        Arc::new(Self {
            queue,
            config,
            emitter,
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        })
    }

    /// Spawns `worker_count` worker fibers, each independently draining the
    /// shared queue. Called once from the composition root.
    pub fn start_workers(self: &Arc<Self>, spawner: &dyn TaskSpawner) {
        for worker_id in 0..self.config.worker_count {
            let manager = Arc::clone(self);
            spawner.spawn(async move {
                manager.worker_loop(worker_id).await;
            });
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        while let Some(entry) = self.queue.dequeue().await {
            self.active.fetch_add(1, Ordering::AcqRel);
            log::debug!("worker {worker_id} picked up job {}", entry.job.id);
            self.run_job(entry).await;
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Accepts `job` into the queue, associating it with `events` for the
    /// duration of its lifetime. Rejects with `SubmitFailed` if the queue is
    /// at capacity.
    pub fn submit(&self, job: Arc<Job>, events: crate::events::JobEventSender) -> Result<(), MediaForgeError> {
        let job_id = job.id.clone();
        self.queue
            .try_submit(QueueEntry { job, events: events.clone() })
            .map_err(|_| MediaForgeError::SubmitFailed(format!("queue at capacity ({})", self.config.queue_capacity)))?;
        self.total.fetch_add(1, Ordering::AcqRel);
        self.emitter
            .emit_job_lifecycle(&job_id, JobLifecyclePhase::Submitted, JobStatus::Queued);
        let _ = events.send(JobEvent::Ack {
            job_id,
            message: "job accepted".to_string(),
        });
        Ok(())
    }

    pub fn stats(&self) -> JobManagerStats {
        JobManagerStats {
            total: self.total.load(Ordering::Acquire),
            active: self.active.load(Ordering::Acquire),
            queued: self.queue.depth(),
            max_concurrent: self.config.worker_count,
        }
    }

    async fn run_job(&self, entry: QueueEntry) {
        let QueueEntry { job, events } = entry;

        if job.is_cancelled() {
            self.finish_cancelled(&job, &events);
            return;
        }

        let work_dir = match tempfile::Builder::new()
            .prefix("mediaforge-job-")
            .tempdir_in(&self.config.work_root)
        {
            Ok(dir) => dir,
            Err(e) => {
                self.finish_failed(
                    &job,
                    &events,
                    JobError {
                        code: "INTERNAL_ERROR",
                        message: "failed to create work directory".into(),
                        detail: Some(e.to_string()),
                    },
                );
                return;
            }
        };
        job.set_work_dir(work_dir.path().to_path_buf());

        let outcome = self.drive_job(&job, &events, work_dir.path()).await;

        // Scoped-acquisition: `work_dir` (a `TempDir`) is removed here
        // regardless of outcome, satisfying invariant 1 before the job's
        // terminal event is even constructed above this point.
        job.clear_work_dir();
        drop(work_dir);

        match outcome {
            Ok(()) => {}
            Err(JobOutcome::Cancelled) => self.finish_cancelled(&job, &events),
            Err(JobOutcome::Failed(error)) => self.finish_failed(&job, &events, error),
        }
    }

    async fn drive_job(
        &self,
        job: &Arc<Job>,
        events: &crate::events::JobEventSender,
        work_dir: &std::path::Path,
    ) -> Result<(), JobOutcome> {
        job.transition(JobStatus::Downloading);
        self.emitter
            .emit_job_lifecycle(&job.id, JobLifecyclePhase::Started, JobStatus::Downloading);

        let input_path = self.stage_input(job, events, work_dir).await?;
        job.set_input_path(input_path.clone());

        if job.is_cancelled() {
            return Err(JobOutcome::Cancelled);
        }
        job.transition(JobStatus::Processing);

        let extra_inputs = self.stage_extra_inputs(job, work_dir).await?;

        if let super::model::Operation::Concat(_) = &job.operation {
            let list_contents = synth::concat_list_contents(&input_path, &extra_inputs);
            if let Err(e) = tokio::fs::write(work_dir.join("concat_list.txt"), list_contents).await {
                return Err(JobOutcome::Failed(JobError {
                    code: "INTERNAL_ERROR",
                    message: "failed to write concat list file".into(),
                    detail: Some(e.to_string()),
                }));
            }
        }

        let synth_result = synth::synthesize(
            &job.operation,
            &input_path,
            &extra_inputs,
            work_dir,
            self.config.ffmpeg_threads,
        );

        let job_for_progress = Arc::clone(job);
        let events_for_progress = events.clone();
        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let run_result = supervisor::run(
            &self.config.ffmpeg_binary,
            &synth_result.argv,
            None,
            &job.cancel,
            timeout,
            move |progress| {
                job_for_progress.set_progress(progress.percent);
                let _ = events_for_progress.send(JobEvent::Progress {
                    job_id: job_for_progress.id.clone(),
                    percentage: progress.percent,
                    stage: JobStatus::Processing,
                    processing_log: progress.speed.map(|s| format!("speed={s:.2}x")),
                });
            },
        )
        .await;

        if let Err(e) = run_result {
            return Err(match e {
                crate::error::SupervisorError::Cancelled => JobOutcome::Cancelled,
                other => JobOutcome::Failed(JobError {
                    code: "JOB_FAILED",
                    message: other.to_string(),
                    detail: None,
                }),
            });
        }

        if job.is_cancelled() {
            return Err(JobOutcome::Cancelled);
        }

        job.transition(JobStatus::Uploading);
        let metadata = probe::probe(&self.config.ffprobe_binary, &synth_result.output_path).await;
        job.set_output_path(synth_result.output_path.clone());

        let artifact_bytes = match tokio::fs::read(&synth_result.output_path).await {
            Ok(bytes) => bytes::Bytes::from(bytes),
            Err(e) => {
                return Err(JobOutcome::Failed(JobError {
                    code: "JOB_FAILED",
                    message: "failed to read transcoder output".into(),
                    detail: Some(e.to_string()),
                }));
            }
        };
        let artifact_filename = synth_result
            .output_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("output")
            .to_string();

        job.transition(JobStatus::Completed);
        self.emitter
            .emit_job_lifecycle(&job.id, JobLifecyclePhase::Completed, JobStatus::Completed);

        let _ = events.send(JobEvent::Completed {
            job_id: job.id.clone(),
            output_metadata: json!(metadata),
            message: "job completed".to_string(),
            artifact_filename,
            artifact_bytes,
        });

        Ok(())
    }

    async fn stage_input(
        &self,
        job: &Arc<Job>,
        events: &crate::events::JobEventSender,
        work_dir: &std::path::Path,
    ) -> Result<PathBuf, JobOutcome> {
        let job_for_progress = Arc::clone(job);
        let events_for_progress = events.clone();
        stage::stage(
            &job.input,
            work_dir,
            self.config.max_input_bytes,
            job.upload.as_ref(),
            &job.cancel,
            move |percent| {
                // Downloads occupy the 0-5% band of the overall job.
                let scaled = (percent as u32 * 5 / 100) as u8;
                job_for_progress.set_progress(scaled);
                let _ = events_for_progress.send(JobEvent::Progress {
                    job_id: job_for_progress.id.clone(),
                    percentage: scaled,
                    stage: JobStatus::Downloading,
                    processing_log: None,
                });
            },
        )
        .await
        .map_err(|e| stage_outcome(e))
    }

    /// `concat` is the only operation needing more than one staged input
    /// today; every other operation returns an empty list here.
    async fn stage_extra_inputs(
        &self,
        job: &Arc<Job>,
        work_dir: &std::path::Path,
    ) -> Result<Vec<PathBuf>, JobOutcome> {
        let super::model::Operation::Concat(opts) = &job.operation else {
            return Ok(Vec::new());
        };
        let mut paths = Vec::with_capacity(opts.inputs.len().saturating_sub(1));
        for (idx, url) in opts.inputs.iter().enumerate().skip(1) {
            let descriptor = super::model::InputDescriptor::Url { url: url.clone() };
            let staged_dir = work_dir.join(format!("concat_input_{idx}"));
            tokio::fs::create_dir_all(&staged_dir).await.ok();
            let path = stage::stage(
                &descriptor,
                &staged_dir,
                self.config.max_input_bytes,
                None,
                &job.cancel,
                |_| {},
            )
            .await
            .map_err(|e| stage_outcome(e))?;
            paths.push(path);
        }
        Ok(paths)
    }

    fn finish_cancelled(&self, job: &Arc<Job>, events: &crate::events::JobEventSender) {
        job.transition(JobStatus::Cancelled);
        self.emitter
            .emit_job_lifecycle(&job.id, JobLifecyclePhase::Cancelled, JobStatus::Cancelled);
        let _ = events.send(JobEvent::Error {
            job_id: Some(job.id.clone()),
            code: "JOB_CANCELLED",
            message: "job was cancelled".to_string(),
            details: None,
        });
    }

    fn finish_failed(&self, job: &Arc<Job>, events: &crate::events::JobEventSender, error: JobError) {
        job.set_error(error.clone());
        job.transition(JobStatus::Failed);
        self.emitter
            .emit_job_lifecycle(&job.id, JobLifecyclePhase::Failed, JobStatus::Failed);
        let _ = events.send(JobEvent::Error {
            job_id: Some(job.id.clone()),
            code: error.code,
            message: error.message,
            details: error.detail,
        });
    }
}

enum JobOutcome {
    Cancelled,
    Failed(JobError),
}

/// Cancellation always transitions to `cancelled`, never `failed` - a
/// cancelled stage must not be reported through the same path as a genuine
/// staging failure.
fn stage_outcome(e: crate::error::StageError) -> JobOutcome {
    if matches!(e, crate::error::StageError::Cancelled) {
        JobOutcome::Cancelled
    } else {
        JobOutcome::Failed(JobError {
            code: "JOB_FAILED",
            message: e.to_string(),
            detail: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::job::model::{InputDescriptor, Operation, RemoveAudioOptions};
    use crate::runtime::TokioSpawner;

    fn test_config(work_root: PathBuf) -> Arc<Config> {
        Arc::new(Config {
            work_root,
            queue_capacity: 1,
            worker_count: 1,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn submit_beyond_capacity_yields_submit_failed() {
        let work_root = std::env::temp_dir().join(format!("manager-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&work_root).await.unwrap();
        let manager = JobManager::new(test_config(work_root.clone()), Arc::new(NoopEventEmitter));

        // Occupy the single queue slot with a job no worker is draining yet.
        let job_a = Arc::new(Job::new(
            "a".into(),
            Operation::RemoveAudio(RemoveAudioOptions { keep_video_quality: false }),
            InputDescriptor::Url { url: "http://test/a.mp4".into() },
        ));
        let (tx_a, _rx_a) = tokio::sync::mpsc::unbounded_channel();
        manager.submit(job_a, tx_a).unwrap();

        let job_b = Arc::new(Job::new(
            "b".into(),
            Operation::RemoveAudio(RemoveAudioOptions { keep_video_quality: false }),
            InputDescriptor::Url { url: "http://test/b.mp4".into() },
        ));
        let (tx_b, _rx_b) = tokio::sync::mpsc::unbounded_channel();
        let result = manager.submit(job_b, tx_b);
        assert!(matches!(result, Err(MediaForgeError::SubmitFailed(_))));

        tokio::fs::remove_dir_all(&work_root).await.ok();
    }

    #[tokio::test]
    async fn worker_count_bounds_concurrent_runs() {
        let work_root = std::env::temp_dir().join(format!("manager-test2-{}", std::process::id()));
        tokio::fs::create_dir_all(&work_root).await.unwrap();
        let config = Arc::new(Config {
            work_root: work_root.clone(),
            queue_capacity: 8,
            worker_count: 2,
            ..Config::default()
        });
        let manager = JobManager::new(config, Arc::new(NoopEventEmitter));
        manager.start_workers(&TokioSpawner::current());
        assert_eq!(manager.stats().max_concurrent, 2);
        tokio::fs::remove_dir_all(&work_root).await.ok();
    }
}
