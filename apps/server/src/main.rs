//! mediaforge-server - standalone headless server for the mediaforge
//! transcoding service.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mediaforge_core::{bootstrap, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// mediaforge-server - headless media transcoding job server.
#[derive(Parser, Debug)]
#[command(name = "mediaforge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MEDIAFORGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind host (overrides config file).
    #[arg(long, env = "MEDIAFORGE_HOST")]
    host: Option<String>,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "MEDIAFORGE_PORT")]
    port: Option<u16>,

    /// Root directory for per-job scratch work (overrides config file).
    #[arg(short = 'w', long, env = "MEDIAFORGE_WORK_ROOT")]
    work_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("mediaforge-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(work_root) = args.work_root {
        config.work_root = Some(work_root);
    }

    let core_config = config.to_core_config();
    log::info!(
        "configuration: host={} port={} worker_count={} queue_capacity={} work_root={}",
        core_config.host,
        core_config.port,
        core_config.worker_count,
        core_config.queue_capacity,
        core_config.work_root.display(),
    );

    tokio::fs::create_dir_all(&core_config.work_root)
        .await
        .with_context(|| {
            format!(
                "failed to create work root directory: {}",
                core_config.work_root.display()
            )
        })?;

    let services = bootstrap(core_config);
    log::info!("services bootstrapped successfully");

    let app_state = AppState::from_services(&services);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("server error: {e}");
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
