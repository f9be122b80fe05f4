//! Text-frame envelopes: the closed set of `type`-tagged JSON messages
//! exchanged over the bidirectional channel.

use serde::{Deserialize, Serialize};

use crate::events::JobEvent;
use crate::job::model::{InputDescriptor, JobStatus, Operation};

/// Inbound message, tagged by `type`. An unrecognized `type` value fails to
/// decode into this enum at all; `Operation`'s own tag governs which
/// `operation`/`options` pairs are recognized within `start_job`.
///
/// Note: `#[serde(deny_unknown_fields)]` cannot be combined with the
/// `#[serde(flatten)]` used by `StartJob` below (a serde limitation), so
/// stray top-level fields are ignored rather than rejected; the options
/// schema itself is still validated via `Operation::validate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    StartJob {
        job_id: String,
        #[serde(flatten)]
        operation: Operation,
        input: InputDescriptor,
    },
    CancelJob {
        job_id: String,
    },
    Ping,
}

/// Outbound message, tagged by `type`. Constructed either directly by the
/// session (`pong`, protocol-level `error`) or projected from a `JobEvent`
/// routed out of the job manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ack {
        job_id: String,
        message: String,
    },
    Progress {
        job_id: String,
        percentage: u8,
        stage: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        processing_log: Option<String>,
    },
    Completed {
        job_id: String,
        output_metadata: serde_json::Value,
        delivery_method: &'static str,
        message: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Pong,
}

impl From<JobEvent> for OutboundMessage {
    fn from(event: JobEvent) -> Self {
        match event {
            JobEvent::Ack { job_id, message } => Self::Ack { job_id, message },
            JobEvent::Progress {
                job_id,
                percentage,
                stage,
                processing_log,
            } => Self::Progress {
                job_id,
                percentage,
                stage,
                processing_log,
            },
            JobEvent::Completed {
                job_id,
                output_metadata,
                message,
                ..
            } => Self::Completed {
                job_id,
                output_metadata,
                delivery_method: "binary",
                message,
            },
            JobEvent::Error {
                job_id,
                code,
                message,
                details,
            } => Self::Error {
                job_id,
                code,
                message,
                details,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::RemoveAudioOptions;

    #[test]
    fn start_job_decodes_operation_and_options_flattened() {
        let json = r#"{
            "type": "start_job",
            "job_id": "j1",
            "operation": "remove_audio",
            "options": {"keep_video_quality": true},
            "input": {"source": "url", "url": "https://example.com/a.mp4"}
        }"#;
        let decoded: InboundMessage = serde_json::from_str(json).unwrap();
        match decoded {
            InboundMessage::StartJob { job_id, operation, input } => {
                assert_eq!(job_id, "j1");
                assert!(matches!(operation, Operation::RemoveAudio(RemoveAudioOptions { keep_video_quality: true })));
                assert!(matches!(input, InputDescriptor::Url { .. }));
            }
            other => panic!("expected StartJob, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let json = r#"{"type": "not_a_real_type"}"#;
        assert!(serde_json::from_str::<InboundMessage>(json).is_err());
    }

    #[test]
    fn ping_requires_no_extra_fields() {
        let decoded: InboundMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(decoded, InboundMessage::Ping));
    }

    #[test]
    fn pong_encodes_with_only_its_type_tag() {
        let json = serde_json::to_string(&OutboundMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn error_without_job_id_omits_the_field() {
        let msg = OutboundMessage::Error {
            job_id: None,
            code: "INVALID_JSON",
            message: "bad input".into(),
            details: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("job_id"));
    }
}
