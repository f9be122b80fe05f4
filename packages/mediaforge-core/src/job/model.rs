//! Job data model: operations, options, status, and the `Job` record itself.
//!
//! The wire-protocol shapes for `operation`/`options` live here as serde types
//! so that `start_job` validation and the synthesizer share one source of truth.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{MediaForgeError, MediaForgeResult};

/// Milliseconds since the Unix epoch. Used instead of `SystemTime` directly
/// so job timestamps serialize into the wire protocol without ceremony.
pub type TimestampMs = u64;

pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations and options
// ─────────────────────────────────────────────────────────────────────────────

/// A validated operation request, tagged by `operation` with its options
/// nested under `options` - matching the `start_job` wire shape exactly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "operation", content = "options", rename_all = "snake_case")]
pub enum Operation {
    Speed(SpeedOptions),
    Compress(CompressOptions),
    ExtractAudio(ExtractAudioOptions),
    RemoveAudio(RemoveAudioOptions),
    Convert(ConvertOptions),
    Thumbnail(ThumbnailOptions),
    Trim(TrimOptions),
    Concat(ConcatOptions),
    Gif(GifOptions),
    Filter(FilterOptions),
    /// Best-effort, not wired to any client UI; see DESIGN.md.
    Subtitle(SubtitleOptions),
}

impl Operation {
    /// Name of the operation as it appears on the wire and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Speed(_) => "speed",
            Self::Compress(_) => "compress",
            Self::ExtractAudio(_) => "extract_audio",
            Self::RemoveAudio(_) => "remove_audio",
            Self::Convert(_) => "convert",
            Self::Thumbnail(_) => "thumbnail",
            Self::Trim(_) => "trim",
            Self::Concat(_) => "concat",
            Self::Gif(_) => "gif",
            Self::Filter(_) => "filter",
            Self::Subtitle(_) => "subtitle",
        }
    }

    /// Runs the option-range validation for the wrapped variant.
    pub fn validate(&self) -> MediaForgeResult<()> {
        match self {
            Self::Speed(o) => o.validate(),
            Self::Compress(o) => o.validate(),
            Self::ExtractAudio(o) => o.validate(),
            Self::RemoveAudio(_) => Ok(()),
            Self::Convert(o) => o.validate(),
            Self::Thumbnail(o) => o.validate(),
            Self::Trim(o) => o.validate(),
            Self::Concat(o) => o.validate(),
            Self::Gif(o) => o.validate(),
            Self::Filter(o) => o.validate(),
            Self::Subtitle(o) => o.validate(),
        }
    }
}

fn validation(msg: impl Into<String>) -> MediaForgeError {
    MediaForgeError::Validation(msg.into())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpeedOptions {
    pub speed_factor: f64,
    #[serde(default)]
    pub maintain_pitch: bool,
}

impl SpeedOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if !(0.25..=10.0).contains(&self.speed_factor) {
            return Err(validation("speed_factor must be in [0.25, 10.0]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressPreset {
    Low,
    Medium,
    High,
    Custom,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompressOptions {
    pub preset: CompressPreset,
    #[serde(default)]
    pub video_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub crf: Option<u8>,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
    #[serde(default)]
    pub target_format: Option<String>,
}

impl CompressOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if let Some(crf) = self.crf {
            if crf > 51 {
                return Err(validation("crf must be in [0, 51]"));
            }
        }
        if self.preset == CompressPreset::Custom
            && self.video_bitrate_kbps.is_none()
            && self.crf.is_none()
        {
            return Err(validation(
                "custom compress preset requires video_bitrate_kbps or crf",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    Aac,
    Wav,
    Opus,
    M4a,
    Flac,
    Ogg,
}

impl AudioCodec {
    /// File extension used for the staged output.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Wav => "wav",
            Self::Opus => "opus",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
        }
    }
}

const RECOGNIZED_SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 44100, 48000, 96000];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractAudioOptions {
    pub format: AudioCodec,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

impl ExtractAudioOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if let Some(rate) = self.sample_rate {
            if !RECOGNIZED_SAMPLE_RATES.contains(&rate) {
                return Err(validation(format!(
                    "sample_rate {rate} is not one of the recognized rates"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveAudioOptions {
    #[serde(default)]
    pub keep_video_quality: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConvertOptions {
    pub target_format: String,
    #[serde(default)]
    pub stream_copy: bool,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
}

impl ConvertOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if self.target_format.trim().is_empty() {
            return Err(validation("target_format must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Jpg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Jpg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThumbnailOptions {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub count: Option<u32>,
    pub format: ImageFormat,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ThumbnailOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        match (self.timestamp, self.count) {
            (Some(_), Some(_)) => {
                Err(validation("thumbnail takes timestamp xor count, not both"))
            }
            (None, None) => Err(validation("thumbnail requires timestamp or count")),
            (Some(ts), None) => {
                if ts < 0.0 {
                    return Err(validation("timestamp must be >= 0"));
                }
                Ok(())
            }
            (None, Some(count)) => {
                if !(1..=20).contains(&count) {
                    return Err(validation("count must be in [1, 20]"));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrimOptions {
    pub start_time: f64,
    pub end_time: f64,
}

impl TrimOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if self.start_time < 0.0 || self.end_time < 0.0 {
            return Err(validation("start_time and end_time must be >= 0"));
        }
        if self.end_time <= self.start_time {
            return Err(validation("end_time must be greater than start_time"));
        }
        Ok(())
    }
}

/// `inputs` names remote sources only (see DESIGN.md: concat is best-effort
/// and not wired to uploads, to avoid multi-slot upload rendezvous complexity).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConcatOptions {
    pub inputs: Vec<String>,
}

impl ConcatOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if self.inputs.len() < 2 {
            return Err(validation("concat requires at least two inputs"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GifOptions {
    pub start_time: f64,
    pub duration: f64,
    pub fps: u32,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub optimize: bool,
}

impl GifOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if self.start_time < 0.0 {
            return Err(validation("start_time must be >= 0"));
        }
        if !(self.duration > 0.0 && self.duration <= 30.0) {
            return Err(validation("duration must be in (0, 30]"));
        }
        if !(1..=30).contains(&self.fps) {
            return Err(validation("fps must be in [1, 30]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    Scale {
        width: Option<u32>,
        height: Option<u32>,
    },
    Rotate {
        degrees: i32,
    },
    Crop {
        width: u32,
        height: u32,
        x: u32,
        y: u32,
    },
    Fps {
        fps: u32,
    },
    Volume {
        multiplier: f64,
    },
    Normalize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilterOptions {
    pub filters: Vec<FilterSpec>,
}

impl FilterOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        if self.filters.is_empty() {
            return Err(validation("filter operation requires at least one filter"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleMode {
    Extract,
    Burn,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SubtitleOptions {
    pub mode: SubtitleMode,
    #[serde(default)]
    pub track_index: Option<u32>,
}

impl SubtitleOptions {
    fn validate(&self) -> MediaForgeResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Where a job's input comes from. The `Upload` variant carries no filename up
/// front - the filename only becomes known when the binary upload frame's
/// header arrives, at which point the stager records it on the job.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "snake_case", deny_unknown_fields)]
pub enum InputDescriptor {
    Upload,
    Url { url: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Rank in the monotone, non-terminal sequence. Terminal states all share
    /// the sequence's tail rank since they can be reached from anywhere.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Downloading => 1,
            Self::Processing => 2,
            Self::Uploading => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Structured job failure detail, mirroring the `error` envelope's shape.
#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
    pub detail: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Upload rendezvous
// ─────────────────────────────────────────────────────────────────────────────

/// Payload delivered by the protocol layer for an upload-sourced job.
pub struct UploadPayload {
    pub filename: String,
    pub bytes: bytes::Bytes,
}

/// A single-slot synchronous handoff between the connection session (producer,
/// on receipt of the binary upload frame) and the input stager (consumer,
/// inside the worker fiber). Filling an already-filled or already-taken slot
/// is rejected so the session can route it to `BINARY_ERROR`.
pub struct UploadRendezvous {
    tx: Mutex<Option<oneshot::Sender<UploadPayload>>>,
    rx: Mutex<Option<oneshot::Receiver<UploadPayload>>>,
}

impl UploadRendezvous {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Delivers the upload payload. Returns `Err` if the slot was already
    /// filled (or the receiver already dropped).
    pub fn deliver(&self, payload: UploadPayload) -> Result<(), UploadPayload> {
        let sender = self.tx.lock().take();
        match sender {
            Some(tx) => tx.send(payload),
            None => Err(payload),
        }
    }

    /// Takes the receiving half. Returns `None` if already taken - the stager
    /// only ever calls this once per job.
    pub fn take_receiver(&self) -> Option<oneshot::Receiver<UploadPayload>> {
        self.rx.lock().take()
    }
}

impl Default for UploadRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct JobState {
    started_at: Option<TimestampMs>,
    finished_at: Option<TimestampMs>,
    work_dir: Option<PathBuf>,
    input_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    error: Option<JobError>,
}

/// One unit of work submitted on a connection. Cheaply clonable via `Arc` -
/// workers, the session's job map, and queue entries all share the same
/// instance rather than copying job state.
pub struct Job {
    pub id: String,
    pub operation: Operation,
    pub input: InputDescriptor,
    pub created_at: TimestampMs,
    pub cancel: CancellationToken,
    pub upload: Option<UploadRendezvous>,
    status: AtomicU8,
    progress_percent: AtomicU8,
    state: Mutex<JobState>,
}

fn status_from_u8(v: u8) -> JobStatus {
    match v {
        0 => JobStatus::Queued,
        1 => JobStatus::Downloading,
        2 => JobStatus::Processing,
        3 => JobStatus::Uploading,
        4 => JobStatus::Completed,
        5 => JobStatus::Failed,
        _ => JobStatus::Cancelled,
    }
}

fn status_to_u8(s: JobStatus) -> u8 {
    match s {
        JobStatus::Queued => 0,
        JobStatus::Downloading => 1,
        JobStatus::Processing => 2,
        JobStatus::Uploading => 3,
        JobStatus::Completed => 4,
        JobStatus::Failed => 5,
        JobStatus::Cancelled => 6,
    }
}

impl Job {
    pub fn new(id: String, operation: Operation, input: InputDescriptor) -> Self {
        let upload = matches!(input, InputDescriptor::Upload).then(UploadRendezvous::new);
        Self {
            id,
            operation,
            input,
            created_at: now_ms(),
            cancel: CancellationToken::new(),
            upload,
            status: AtomicU8::new(status_to_u8(JobStatus::Queued)),
            progress_percent: AtomicU8::new(0),
            state: Mutex::new(JobState::default()),
        }
    }

    pub fn status(&self) -> JobStatus {
        status_from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent.load(Ordering::Acquire)
    }

    /// Updates progress, enforcing "non-decreasing within a single status".
    /// A status change resets the floor, since each stage starts its own
    /// 0-100 band (the stager's 0-5% download band is the exception, handled
    /// by the caller clamping into that sub-range before calling this).
    pub fn set_progress(&self, percent: u8) {
        let percent = percent.min(100);
        let _ = self
            .progress_percent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if percent > current {
                    Some(percent)
                } else {
                    None
                }
            });
    }

    /// Attempts the transition to `new_status`. Returns `false` (no-op) if
    /// `new_status` would violate monotonicity - terminal states are the only
    /// exception, reachable from any non-terminal state.
    pub fn transition(&self, new_status: JobStatus) -> bool {
        let current = self.status();
        if current.is_terminal() {
            return false;
        }
        if !new_status.is_terminal() && new_status.rank() <= current.rank() {
            return false;
        }
        self.status
            .store(status_to_u8(new_status), Ordering::Release);
        let mut state = self.state.lock();
        if current == JobStatus::Queued && new_status != JobStatus::Queued {
            state.started_at = Some(now_ms());
        }
        if new_status.is_terminal() {
            state.finished_at = Some(now_ms());
        }
        if new_status != JobStatus::Queued {
            // Each stage restarts its own progress band except 0 itself.
            self.progress_percent.store(0, Ordering::Release);
        }
        true
    }

    pub fn set_work_dir(&self, dir: PathBuf) {
        self.state.lock().work_dir = Some(dir);
    }

    pub fn clear_work_dir(&self) {
        self.state.lock().work_dir = None;
    }

    pub fn work_dir(&self) -> Option<PathBuf> {
        self.state.lock().work_dir.clone()
    }

    pub fn set_input_path(&self, path: PathBuf) {
        self.state.lock().input_path = Some(path);
    }

    pub fn set_output_path(&self, path: PathBuf) {
        self.state.lock().output_path = Some(path);
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.state.lock().output_path.clone()
    }

    pub fn set_error(&self, error: JobError) {
        self.state.lock().error = Some(error);
    }

    pub fn error(&self) -> Option<JobError> {
        self.state.lock().error.clone()
    }

    pub fn started_at(&self) -> Option<TimestampMs> {
        self.state.lock().started_at
    }

    pub fn finished_at(&self) -> Option<TimestampMs> {
        self.state.lock().finished_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Clone for JobError {
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            detail: self.detail.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "j1".into(),
            Operation::Speed(SpeedOptions {
                speed_factor: 2.0,
                maintain_pitch: false,
            }),
            InputDescriptor::Url {
                url: "http://test/v.mp4".into(),
            },
        )
    }

    #[test]
    fn status_is_monotone() {
        let j = job();
        assert!(j.transition(JobStatus::Downloading));
        assert!(j.transition(JobStatus::Processing));
        assert!(!j.transition(JobStatus::Downloading));
        assert!(j.transition(JobStatus::Uploading));
        assert!(j.transition(JobStatus::Completed));
        assert!(!j.transition(JobStatus::Failed));
    }

    #[test]
    fn cancel_is_terminal_from_any_state() {
        let j = job();
        assert!(j.transition(JobStatus::Downloading));
        assert!(j.transition(JobStatus::Cancelled));
        assert_eq!(j.status(), JobStatus::Cancelled);
    }

    #[test]
    fn progress_never_regresses_within_a_status() {
        let j = job();
        j.transition(JobStatus::Downloading);
        j.set_progress(40);
        j.set_progress(10);
        assert_eq!(j.progress_percent(), 40);
        j.set_progress(90);
        assert_eq!(j.progress_percent(), 90);
    }

    #[test]
    fn thumbnail_rejects_both_timestamp_and_count() {
        let opts = ThumbnailOptions {
            timestamp: Some(1.0),
            count: Some(3),
            format: ImageFormat::Png,
            width: None,
            height: None,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn upload_rendezvous_rejects_double_delivery() {
        let slot = UploadRendezvous::new();
        let payload = UploadPayload {
            filename: "in.mp4".into(),
            bytes: bytes::Bytes::from_static(b"abc"),
        };
        assert!(slot.deliver(payload).is_ok());
        let payload2 = UploadPayload {
            filename: "in.mp4".into(),
            bytes: bytes::Bytes::from_static(b"abc"),
        };
        assert!(slot.deliver(payload2).is_err());
    }
}
