//! Bounded FIFO job queue.
//!
//! The only structure shared across worker fibers. Depth is tracked
//! alongside the channel itself since `mpsc::Receiver` exposes no length.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::model::Job;
use crate::events::JobEventSender;
use std::sync::Arc as StdArc;

/// A queued job plus the session callback that should receive its events.
pub struct QueueEntry {
    pub job: StdArc<Job>,
    pub events: JobEventSender,
}

/// Bounded, FIFO, multi-producer multi-consumer queue of `QueueEntry`.
///
/// Built on a bounded `mpsc` channel so that `try_submit` backpressures
/// exactly at the configured capacity (invariant 7: the queue is never
/// observed larger than the cap). A single receiver is shared behind an
/// async mutex so several worker fibers can `dequeue` from the same FIFO
/// without jobs migrating or interleaving.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueueEntry>,
    rx: Arc<AsyncMutex<mpsc::Receiver<QueueEntry>>>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Enqueues `entry`, or rejects immediately if the queue is at capacity.
    pub fn try_submit(&self, entry: QueueEntry) -> Result<(), QueueEntry> {
        match self.tx.try_send(entry) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(entry)) => Err(entry),
            Err(mpsc::error::TrySendError::Closed(entry)) => Err(entry),
        }
    }

    /// Waits for and removes the next entry, FIFO. The entry is dropped from
    /// the queue the moment a worker takes it - only the session's job map
    /// keeps it reachable afterward.
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        let mut rx = self.rx.lock().await;
        let entry = rx.recv().await;
        if entry.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{InputDescriptor, Job, Operation, RemoveAudioOptions};

    fn entry(id: &str) -> QueueEntry {
        let (tx, _rx) = mpsc::unbounded_channel();
        QueueEntry {
            job: StdArc::new(Job::new(
                id.into(),
                Operation::RemoveAudio(RemoveAudioOptions {
                    keep_video_quality: false,
                }),
                InputDescriptor::Url {
                    url: "http://test/a.mp4".into(),
                },
            )),
            events: tx,
        }
    }

    #[tokio::test]
    async fn rejects_beyond_capacity() {
        let queue = JobQueue::new(1);
        assert!(queue.try_submit(entry("a")).is_ok());
        assert!(queue.try_submit(entry("b")).is_err());
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_frees_capacity() {
        let queue = JobQueue::new(2);
        queue.try_submit(entry("a")).unwrap();
        queue.try_submit(entry("b")).unwrap();
        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.job.id, "a");
        assert_eq!(queue.depth(), 1);
        assert!(queue.try_submit(entry("c")).is_ok());
    }
}
