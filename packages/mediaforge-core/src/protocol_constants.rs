//! Fixed protocol and scheduling constants.
//!
//! Values here are either mandated by the wire protocol (so changing them
//! breaks compatibility with existing clients) or are the documented
//! defaults for the configuration surface — each has a one-line rationale
//! rather than a bare number.

// ─────────────────────────────────────────────────────────────────────────────
// Binary frame layout
// ─────────────────────────────────────────────────────────────────────────────

/// Width, in bytes, of the big-endian header-length prefix on a binary frame.
///
/// Fixed by the wire format; not configurable.
pub const BINARY_HEADER_LEN_BYTES: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Job manager defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of worker fibers (in-flight transcoding subprocesses).
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default bounded queue depth before `submit` rejects with `SUBMIT_FAILED`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default per-job wall-clock timeout (seconds) before the supervisor
/// escalates to a timeout failure.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

/// Grace period (seconds) given to the transcoder after a graceful
/// termination request before a forceful kill is sent.
pub const CANCEL_GRACE_SECS: u64 = 5;

/// How long a completed/failed/cancelled job is retained in the session's
/// job map before being purged, so late protocol frames still reconcile.
pub const JOB_RETENTION_GRACE_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Subprocess progress reporting
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum interval between progress callback invocations from the same
/// supervised run, absent a whole-percent boundary crossing.
pub const PROGRESS_MIN_INTERVAL_MS: u64 = 500;

/// Bounded length (bytes) of the stderr tail preserved in a failure report.
pub const STDERR_TAIL_MAX_BYTES: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// Input staging
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum bytes accepted for a staged input (url download or upload).
///
/// 2 GiB comfortably covers source video for the supported operations
/// without letting one job exhaust disk on the work-root volume.
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// How long, after a job starts running, the stager waits for an upload
/// frame to arrive on the rendezvous channel before failing with
/// `upload_missing`.
pub const UPLOAD_WAIT_TIMEOUT_SECS: u64 = 120;

/// Byte-count cap a single url download chunk reports progress at, to
/// avoid flooding the 0-5% progress band with per-chunk events.
pub const DOWNLOAD_PROGRESS_CHUNK_BYTES: u64 = 256 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Connection session
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket heartbeat timeout (seconds): if no inbound frame is observed
/// for this long, the session closes itself and cancels its jobs.
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Background sweeper
// ─────────────────────────────────────────────────────────────────────────────

/// Default interval (seconds) between background sweeps of the work-root.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Safety multiplier applied to the job timeout to derive the sweeper's
/// "stale" age threshold — wide enough that an in-flight job's directory
/// is never mistaken for an orphan.
pub const SWEEP_AGE_SAFETY_MULTIPLIER: u64 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier surfaced on the health endpoint.
pub const SERVICE_ID: &str = "mediaforge";
