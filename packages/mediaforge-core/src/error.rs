//! Centralized error types for the mediaforge core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to the wire-protocol error taxonomy and to HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses on the HTTP surface

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths; the WebSocket `error` envelope, the HTTP error
/// body, and log lines all read the same code through this one seam.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Why the input stager could not produce a local file.
#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum StageError {
    /// The download exceeded the configured byte cap.
    #[error("input exceeded the maximum allowed size")]
    SizeExceeded,
    /// A network error occurred while streaming the input.
    #[error("network error while staging input: {0}")]
    Network(String),
    /// No upload arrived within the configured grace period.
    #[error("no upload arrived for this job")]
    UploadMissing,
    /// The url input used a scheme other than http/https.
    #[error("scheme not allowed for url input")]
    SchemeNotAllowed,
    /// The job's cancel signal fired while staging was in progress.
    #[error("staging cancelled")]
    Cancelled,
}

impl ErrorCode for StageError {
    fn code(&self) -> &'static str {
        match self {
            Self::SizeExceeded => "size_exceeded",
            Self::Network(_) => "network_error",
            Self::UploadMissing => "upload_missing",
            Self::SchemeNotAllowed => "scheme_not_allowed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why the subprocess supervisor's `run()` did not produce a successful result.
#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SupervisorError {
    /// The transcoder binary could not be spawned (missing / permission denied).
    #[error("failed to spawn transcoder: {0}")]
    SpawnFailed(String),
    /// The transcoder exited with a non-zero status.
    #[error("transcoder exited with status {exit_code:?}: {stderr_tail}")]
    Exited {
        /// Process exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Bounded tail of captured stderr, for diagnosis.
        stderr_tail: String,
    },
    /// The wall-clock timeout elapsed before the transcoder finished.
    #[error("transcoder timed out")]
    Timeout,
    /// The job's cancel signal fired before the transcoder finished.
    #[error("transcoder run was cancelled")]
    Cancelled,
}

impl ErrorCode for SupervisorError {
    fn code(&self) -> &'static str {
        match self {
            Self::SpawnFailed(_) => "spawn_failed",
            Self::Exited { .. } => "exited",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Top-level error type surfaced to the wire protocol and the HTTP surface.
///
/// Variant names deliberately mirror the `error` envelope's `code` taxonomy
/// from the external-interfaces section of the job-pipeline design so that
/// `code()` never has to improvise a string.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum MediaForgeError {
    /// A text frame could not be parsed as JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A `start_job` envelope failed schema/option validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The `type` field of an inbound envelope is not in the closed set.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The job manager rejected `submit` (queue full or id collision).
    #[error("submit failed: {0}")]
    SubmitFailed(String),

    /// The job's subprocess supervisor reported a failure.
    #[error("job failed: {0}")]
    JobFailed(#[from] SupervisorError),

    /// The job's cancel signal was observed before completion.
    #[error("job cancelled")]
    JobCancelled,

    /// `cancel_job` targeted an id that is unknown or already terminal.
    #[error("cancel failed: {0}")]
    CancelFailed(String),

    /// An inbound binary frame's header could not be parsed.
    #[error("invalid binary frame: {0}")]
    InvalidBinary(String),

    /// An inbound binary frame could not be routed to a job.
    #[error("binary frame error: {0}")]
    BinaryError(String),

    /// Sending the completion or artifact frame back to the client failed.
    #[error("failed to send output: {0}")]
    OutputSendFailed(String),

    /// The input stager could not materialize a local file.
    #[error("stage failed: {0}")]
    Stage(#[from] StageError),

    /// Catch-all for faults that should never reach a client in detail.
    #[error("internal error")]
    Internal(String),
}

impl ErrorCode for MediaForgeError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            Self::SubmitFailed(_) => "SUBMIT_FAILED",
            Self::JobFailed(_) => "JOB_FAILED",
            Self::JobCancelled => "JOB_CANCELLED",
            Self::CancelFailed(_) => "CANCEL_FAILED",
            Self::InvalidBinary(_) => "INVALID_BINARY",
            Self::BinaryError(_) => "BINARY_ERROR",
            Self::OutputSendFailed(_) => "OUTPUT_SEND_FAILED",
            Self::Stage(e) => match e {
                StageError::SizeExceeded => "VALIDATION_ERROR",
                StageError::Network(_) => "JOB_FAILED",
                StageError::UploadMissing => "JOB_FAILED",
                StageError::SchemeNotAllowed => "VALIDATION_ERROR",
                StageError::Cancelled => "JOB_CANCELLED",
            },
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl MediaForgeError {
    /// Maps the error to an appropriate HTTP status code, for the few places
    /// this error type is returned from the HTTP surface rather than the
    /// WebSocket `error` envelope.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_)
            | Self::Validation(_)
            | Self::UnknownMessageType(_)
            | Self::InvalidBinary(_)
            | Self::BinaryError(_) => StatusCode::BAD_REQUEST,
            Self::SubmitFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CancelFailed(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A short, generic message safe to show a client. Internal errors never
    /// echo their detail over the wire; they are logged in full instead.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// JSON response body for HTTP error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for MediaForgeError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            log::error!("internal error: {self}");
        }
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.client_message(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Convenient Result alias for core-library operations.
pub type MediaForgeResult<T> = Result<T, MediaForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_failed_wraps_supervisor_error_code() {
        let err = MediaForgeError::JobFailed(SupervisorError::Timeout);
        assert_eq!(err.code(), "JOB_FAILED");
    }

    #[test]
    fn stage_size_exceeded_maps_to_validation_error() {
        let err = MediaForgeError::Stage(StageError::SizeExceeded);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn internal_error_hides_detail_from_client() {
        let err = MediaForgeError::Internal("leaked secret path".into());
        assert_eq!(err.client_message(), "an internal error occurred");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn cancel_failed_is_not_found() {
        let err = MediaForgeError::CancelFailed("unknown job".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "CANCEL_FAILED");
    }
}
