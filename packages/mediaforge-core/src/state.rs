//! Core application state: the immutable configuration record captured once
//! at startup and threaded through the composition root.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_QUEUE_CAPACITY, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_WORKER_COUNT, WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS,
};

/// Flat, `#[serde(default)]`-annotated configuration record. Loaded from an
/// optional YAML file, then overridden field-by-field by recognized
/// environment variables, then by CLI flags (highest precedence) - see
/// `apps/server/src/config.rs` for the loader itself. Captured once at
/// startup into an `Arc<Config>`; no component mutates it afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind host for the HTTP/WebSocket surface.
    pub host: String,
    /// Bind port for the HTTP/WebSocket surface.
    pub port: u16,
    /// Number of worker fibers draining the job queue.
    pub worker_count: usize,
    /// Bounded job queue depth before `submit` rejects with `SUBMIT_FAILED`.
    pub queue_capacity: usize,
    /// Per-job wall-clock timeout, in seconds, before the supervisor
    /// escalates to a timeout failure.
    pub job_timeout_secs: u64,
    /// `-threads` hint passed to the transcoder, or `None` to let it choose.
    pub ffmpeg_threads: Option<u32>,
    /// Maximum accepted bytes for a staged input (download or upload).
    pub max_input_bytes: u64,
    /// Root directory under which each job gets its own temp work directory.
    pub work_root: PathBuf,
    /// Interval, in seconds, between background sweeper passes.
    pub sweep_interval_secs: u64,
    /// Log level passed to the logger at startup (e.g. `"info"`, `"debug"`).
    pub log_level: String,
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

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7878,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            ffmpeg_threads: None,
            max_input_bytes: crate::protocol_constants::DEFAULT_MAX_INPUT_BYTES,
            work_root: std::env::temp_dir().join("mediaforge"),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            log_level: "info".to_string(),
            ws_frame_size_cap_bytes: 64 * 1024 * 1024,
            ws_keepalive_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
            ws_keepalive_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.job_timeout_secs, 3600);
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.worker_count, config.worker_count);
        assert_eq!(parsed.work_root, config.work_root);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: Config = serde_yaml::from_str("port: 9000\n").unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.worker_count, DEFAULT_WORKER_COUNT);
    }
}
