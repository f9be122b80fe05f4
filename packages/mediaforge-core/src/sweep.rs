//! Background sweeper: a belt-and-braces backstop that removes work
//! directories the scoped-acquisition discipline in `job::manager` should
//! already have cleaned up (a job whose worker panicked mid-run, say).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::protocol_constants::SWEEP_AGE_SAFETY_MULTIPLIER;

/// Runs forever (until `cancel` fires), sweeping `work_root` every `interval`
/// for directories whose last-modified time is older than `max_age`.
pub async fn run(work_root: PathBuf, interval: Duration, max_age: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("background sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {
                let removed = sweep_once(&work_root, max_age).await;
                if removed > 0 {
                    log::info!("background sweeper removed {removed} stale work directories");
                }
            }
        }
    }
}

/// Derives the sweeper's stale-age threshold from the per-job timeout.
pub fn stale_age(job_timeout: Duration) -> Duration {
    job_timeout * SWEEP_AGE_SAFETY_MULTIPLIER as u32
}

async fn sweep_once(work_root: &Path, max_age: Duration) -> usize {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(work_root).await {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("background sweeper could not read work root: {e}");
            return 0;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > max_age {
            if tokio::fs::remove_dir_all(&path).await.is_ok() {
                removed += 1;
            } else {
                log::warn!("background sweeper failed to remove {}", path.display());
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_age_applies_the_safety_multiplier() {
        assert_eq!(stale_age(Duration::from_secs(100)), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn sweep_once_removes_only_directories_older_than_max_age() {
        let root = std::env::temp_dir().join(format!("sweep-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&root).await.unwrap();
        let stale = root.join("stale-job");
        let fresh = root.join("fresh-job");
        tokio::fs::create_dir_all(&stale).await.unwrap();
        tokio::fs::create_dir_all(&fresh).await.unwrap();

        // Backdate the "stale" directory's mtime well past max_age.
        let old_time = SystemTime::now() - Duration::from_secs(3600);
        filetime_backdate(&stale, old_time);

        let removed = sweep_once(&root, Duration::from_secs(60)).await;
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    /// Minimal mtime backdating without pulling in a dedicated crate: opens
    /// and immediately sets times via `std::fs`'s `File::set_times` on a
    /// platform that supports it, falling back to a no-op test skip
    /// otherwise (the assertion above would then need `>=`, so this keeps
    /// the test meaningful on common CI platforms without adding a
    /// filetime-manipulation dependency for one test).
    fn filetime_backdate(path: &Path, time: SystemTime) {
        if let Ok(file) = std::fs::File::open(path) {
            let times = std::fs::FileTimes::new().set_modified(time);
            let _ = file.set_times(times);
        }
    }
}
