//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: all dependency relationships are visible in one place
//! - **Testability**: easy to swap implementations for testing
//! - **No global state**: every collaborator is an explicit object, passed in

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;
use crate::events::{EventEmitter, LoggingEventEmitter};
use crate::job::JobManager;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::Config;
use crate::sweep;

/// Container for all bootstrapped services, consumed by `AppState` to build
/// the final shared application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub config: Arc<Config>,
    pub job_manager: Arc<JobManager>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub spawner: Arc<TokioSpawner>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: stop accepting new work, cancel every
    /// in-flight job, and close all live connections. Does not wait for
    /// in-flight jobs' cleanup to finish - each worker's scoped-acquisition
    /// discipline handles that independently.
    pub async fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("closed {closed} connection(s) during shutdown");
        }
        log::info!("shutdown signaled");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order:
/// 1. Task spawner, bound to the current Tokio runtime.
/// 2. Event emitter (ambient job-lifecycle logging).
/// 3. Job manager, which owns the bounded queue and starts its worker fibers.
/// 4. WebSocket connection manager.
/// 5. Background sweeper, spawned as a long-lived task under the shared
///    cancellation token.
pub fn bootstrap(config: Config) -> BootstrappedServices {
    let config = Arc::new(config);
    let cancel_token = CancellationToken::new();
    let spawner = Arc::new(TokioSpawner::current());

    let emitter: Arc<dyn EventEmitter> = Arc::new(LoggingEventEmitter);
    let job_manager = JobManager::new(Arc::clone(&config), emitter);
    job_manager.start_workers(spawner.as_ref());

    let ws_manager = Arc::new(WsConnectionManager::new());

    let sweep_root = config.work_root.clone();
    let sweep_interval = std::time::Duration::from_secs(config.sweep_interval_secs);
    let sweep_max_age = sweep::stale_age(std::time::Duration::from_secs(config.job_timeout_secs));
    let sweep_cancel = cancel_token.child_token();
    spawner.spawn(async move {
        sweep::run(sweep_root, sweep_interval, sweep_max_age, sweep_cancel).await;
    });

    BootstrappedServices {
        config,
        job_manager,
        ws_manager,
        spawner,
        cancel_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_a_job_manager_matching_config() {
        let work_root = std::env::temp_dir().join(format!("bootstrap-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&work_root).await.unwrap();
        let config = Config {
            work_root: work_root.clone(),
            worker_count: 2,
            ..Config::default()
        };
        let services = bootstrap(config);
        assert_eq!(services.job_manager.stats().max_concurrent, 2);
        services.shutdown().await;
        tokio::fs::remove_dir_all(&work_root).await.ok();
    }
}
