//! Server configuration.
//!
//! Supports loading from a YAML file with environment variable overrides,
//! itself overridden by CLI flags in `main.rs` (highest precedence).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host for the HTTP/WebSocket surface.
    /// Override: `MEDIAFORGE_HOST`
    pub host: String,

    /// Bind port for the HTTP/WebSocket surface.
    /// Override: `MEDIAFORGE_PORT`
    pub port: u16,

    /// Number of worker fibers draining the job queue.
    /// Override: `MEDIAFORGE_WORKER_COUNT`
    pub worker_count: usize,

    /// Bounded job queue depth before `submit` rejects with `SUBMIT_FAILED`.
    /// Override: `MEDIAFORGE_QUEUE_CAPACITY`
    pub queue_capacity: usize,

    /// Per-job wall-clock timeout, in seconds.
    /// Override: `MEDIAFORGE_JOB_TIMEOUT_SECS`
    pub job_timeout_secs: u64,

    /// `-threads` hint passed to the transcoder, or unset to let it choose.
    pub ffmpeg_threads: Option<u32>,

    /// Maximum accepted bytes for a staged input (download or upload).
    /// Override: `MEDIAFORGE_MAX_INPUT_BYTES`
    pub max_input_bytes: u64,

    /// Root directory under which each job gets its own temp work directory.
    /// Override: `MEDIAFORGE_WORK_ROOT`
    pub work_root: Option<PathBuf>,

    /// Interval, in seconds, between background sweeper passes.
    pub sweep_interval_secs: u64,

    /// Maximum size, in bytes, of a single inbound WebSocket frame.
    pub ws_frame_size_cap_bytes: usize,

    /// Interval, in seconds, between heartbeat checks on a connection.
    pub ws_keepalive_interval_secs: u64,

    /// How long, in seconds, a connection may go without an inbound frame
    /// before the session closes itself and cancels its jobs.
    pub ws_keepalive_timeout_secs: u64,

    /// Executable name or path for the transcoder.
    pub ffmpeg_binary: String,

    /// Executable name or path for the metadata prober.
    pub ffprobe_binary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = mediaforge_core::Config::default();
        Self {
            host: core.host,
            port: core.port,
            worker_count: core.worker_count,
            queue_capacity: core.queue_capacity,
            job_timeout_secs: core.job_timeout_secs,
            ffmpeg_threads: core.ffmpeg_threads,
            max_input_bytes: core.max_input_bytes,
            work_root: None,
            sweep_interval_secs: core.sweep_interval_secs,
            ws_frame_size_cap_bytes: core.ws_frame_size_cap_bytes,
            ws_keepalive_interval_secs: core.ws_keepalive_interval_secs,
            ws_keepalive_timeout_secs: core.ws_keepalive_timeout_secs,
            ffmpeg_binary: core.ffmpeg_binary,
            ffprobe_binary: core.ffprobe_binary,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEDIAFORGE_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("MEDIAFORGE_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("MEDIAFORGE_WORKER_COUNT") {
            if let Ok(n) = val.parse() {
                self.worker_count = n;
            }
        }
        if let Ok(val) = std::env::var("MEDIAFORGE_QUEUE_CAPACITY") {
            if let Ok(n) = val.parse() {
                self.queue_capacity = n;
            }
        }
        if let Ok(val) = std::env::var("MEDIAFORGE_JOB_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.job_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("MEDIAFORGE_MAX_INPUT_BYTES") {
            if let Ok(n) = val.parse() {
                self.max_input_bytes = n;
            }
        }
        if let Ok(val) = std::env::var("MEDIAFORGE_WORK_ROOT") {
            self.work_root = Some(PathBuf::from(val));
        }

        // MEDIAFORGE_DATA_DIR-equivalent for this service: work_root is
        // handled above via MEDIAFORGE_WORK_ROOT; the directory itself is
        // created by the job manager per-job, not by the loader.
    }

    /// Converts to mediaforge-core's `Config` type.
    pub fn to_core_config(&self) -> mediaforge_core::Config {
        let defaults = mediaforge_core::Config::default();
        mediaforge_core::Config {
            host: self.host.clone(),
            port: self.port,
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            job_timeout_secs: self.job_timeout_secs,
            ffmpeg_threads: self.ffmpeg_threads,
            max_input_bytes: self.max_input_bytes,
            work_root: self.work_root.clone().unwrap_or(defaults.work_root),
            sweep_interval_secs: self.sweep_interval_secs,
            log_level: defaults.log_level,
            ws_frame_size_cap_bytes: self.ws_frame_size_cap_bytes,
            ws_keepalive_interval_secs: self.ws_keepalive_interval_secs,
            ws_keepalive_timeout_secs: self.ws_keepalive_timeout_secs,
            ffmpeg_binary: self.ffmpeg_binary.clone(),
            ffprobe_binary: self.ffprobe_binary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_core_defaults() {
        let config = ServerConfig::default();
        let core = config.to_core_config();
        assert_eq!(core.port, 7878);
        assert_eq!(core.worker_count, 4);
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let yaml = "port: 9100\nworker_count: 8\n";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_capacity, ServerConfig::default().queue_capacity);
    }
}
