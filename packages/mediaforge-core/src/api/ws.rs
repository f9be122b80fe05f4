//! Connection Session: one WebSocket per client.
//!
//! Owns the set of jobs submitted on this connection, dispatches inbound
//! protocol frames, forwards job lifecycle events back as outbound frames,
//! and cancels outstanding jobs on disconnect. The whole session runs as a
//! single task, so the outbound half of the socket is naturally
//! write-serialized - no separate mutex is needed for "only one sender at a
//! time on the channel".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::sink::SinkExt;
use futures::stream::StreamExt;

use crate::api::AppState;
use crate::error::ErrorCode;
use crate::events::{JobEvent, JobEventReceiver};
use crate::job::model::{Job, JobStatus};
use crate::protocol::envelope::{InboundMessage, OutboundMessage};
use crate::protocol::frame::{BinaryFrame, FrameError, FrameHeader};
use crate::protocol_constants::JOB_RETENTION_GRACE_SECS;

/// WebSocket upgrade entry point. Enforces the configured frame-size cap at
/// the transport level so an oversized inbound frame is rejected by axum
/// before it ever reaches `handle_ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let frame_cap = state.config.ws_frame_size_cap_bytes;
    ws.max_frame_size(frame_cap)
        .max_message_size(frame_cap)
        .on_upgrade(move |socket| handle_ws(socket, state))
}

/// A job this session has submitted, plus when it reached a terminal state
/// (used to purge it from `jobs` after the retention grace period).
struct SessionJob {
    job: Arc<Job>,
    terminal_since: Option<Instant>,
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let conn_guard = state.ws_manager.register();
    let session_cancel = conn_guard.cancel_token().clone();
    log::info!("[ws] connection {} established", conn_guard.id());

    let (events_tx, mut events_rx): (_, JobEventReceiver) = tokio::sync::mpsc::unbounded_channel();
    let mut jobs: HashMap<String, SessionJob> = HashMap::new();

    let mut last_activity = Instant::now();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(state.config.ws_keepalive_interval_secs));
    let keepalive_timeout = Duration::from_secs(state.config.ws_keepalive_timeout_secs);
    let retention_grace = Duration::from_secs(JOB_RETENTION_GRACE_SECS);

    loop {
        tokio::select! {
            biased;

            _ = session_cancel.cancelled() => {
                log::info!("[ws] connection {} force-closed", conn_guard.id());
                break;
            }

            _ = heartbeat.tick() => {
                if last_activity.elapsed() > keepalive_timeout {
                    log::info!("[ws] connection {} idle past keepalive timeout", conn_guard.id());
                    break;
                }
                purge_retained_jobs(&mut jobs, retention_grace);
            }

            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Some(id) = event.job_id() {
                            if event.is_terminal() {
                                if let Some(entry) = jobs.get_mut(id) {
                                    entry.terminal_since = Some(Instant::now());
                                }
                            }
                        }
                        if !deliver_job_event(&mut sender, event).await {
                            break;
                        }
                    }
                    None => unreachable!("events_tx is held by this task for its whole lifetime"),
                }
            }

            inbound = receiver.next() => {
                let Some(inbound) = inbound else {
                    log::info!("[ws] connection {} closed by peer", conn_guard.id());
                    break;
                };
                last_activity = Instant::now();
                match inbound {
                    Ok(Message::Text(text)) => {
                        if !handle_text_frame(&state, &mut sender, &mut jobs, &events_tx, &text).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        if !handle_binary_frame(&mut sender, &jobs, data).await {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("[ws] connection {} sent close frame", conn_guard.id());
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Err(e) => {
                        log::warn!("[ws] connection {} read error: {e}", conn_guard.id());
                        break;
                    }
                }
            }
        }
    }

    // Disconnect: cancel every non-terminal job on this session, best
    // effort. The worker loop observes cancellation at its next suspension
    // point and releases the job's work directory itself.
    let mut cancelled = 0;
    for entry in jobs.values() {
        if !entry.job.status().is_terminal() {
            entry.job.cancel.cancel();
            cancelled += 1;
        }
    }
    if cancelled > 0 {
        log::info!("[ws] connection {} cancelled {cancelled} job(s) on disconnect", conn_guard.id());
    }
}

fn purge_retained_jobs(jobs: &mut HashMap<String, SessionJob>, grace: Duration) {
    jobs.retain(|_, entry| match entry.terminal_since {
        Some(since) => since.elapsed() < grace,
        None => true,
    });
}

/// Projects a routed `JobEvent` into the outbound wire protocol. The
/// `Completed` variant is handled specially so the JSON envelope and binary
/// artifact frame are sent as two separate, strictly ordered messages
/// (invariant 4); every other variant maps straight through.
///
/// Returns `false` if the socket appears dead and the session loop should
/// stop (the artifact bytes are simply dropped along with everything else
/// buffered for this job - its temp file was already released by the
/// manager before this event was even sent).
async fn deliver_job_event(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: JobEvent,
) -> bool {
    match event {
        JobEvent::Completed {
            job_id,
            output_metadata,
            message,
            artifact_filename,
            artifact_bytes,
        } => {
            let envelope = OutboundMessage::Completed {
                job_id: job_id.clone(),
                output_metadata,
                delivery_method: "binary",
                message,
            };
            if !send_text(sender, &envelope).await {
                return false;
            }
            let frame = BinaryFrame::new(
                FrameHeader { job_id, filename: artifact_filename },
                artifact_bytes,
            );
            send_binary(sender, frame.encode()).await
        }
        other => {
            let envelope: OutboundMessage = other.into();
            send_text(sender, &envelope).await
        }
    }
}

async fn send_text(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    envelope: &OutboundMessage,
) -> bool {
    let Ok(json) = serde_json::to_string(envelope) else {
        log::error!("[ws] failed to serialize outbound envelope");
        return true;
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn send_binary(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    bytes: Bytes,
) -> bool {
    sender.send(Message::Binary(bytes)).await.is_ok()
}

async fn send_error(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    job_id: Option<String>,
    code: &'static str,
    message: String,
) -> bool {
    send_text(
        sender,
        &OutboundMessage::Error { job_id, code, message, details: None },
    )
    .await
}

/// Handles one inbound text envelope. Returns `false` if the session loop
/// should stop (the outbound socket died while replying).
async fn handle_text_frame(
    state: &AppState,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    jobs: &mut HashMap<String, SessionJob>,
    events_tx: &crate::events::JobEventSender,
    text: &str,
) -> bool {
    let parsed: Result<InboundMessage, _> = serde_json::from_str(text);
    let message = match parsed {
        Ok(message) => message,
        Err(e) => return send_error(sender, None, "INVALID_JSON", e.to_string()).await,
    };

    match message {
        InboundMessage::Ping => send_text(sender, &OutboundMessage::Pong).await,

        InboundMessage::StartJob { job_id, operation, input } => {
            if jobs.contains_key(&job_id) {
                return send_error(
                    sender,
                    Some(job_id),
                    "SUBMIT_FAILED",
                    "job id already in use on this connection".to_string(),
                )
                .await;
            }
            if let Err(e) = operation.validate() {
                return send_error(sender, Some(job_id), "VALIDATION_ERROR", e.to_string()).await;
            }

            let job = Arc::new(Job::new(job_id.clone(), operation, input));
            match state.job_manager.submit(Arc::clone(&job), events_tx.clone()) {
                Ok(()) => {
                    jobs.insert(job_id, SessionJob { job, terminal_since: None });
                    true
                }
                Err(e) => send_error(sender, Some(job_id), e.code(), e.client_message()).await,
            }
        }

        InboundMessage::CancelJob { job_id } => {
            match jobs.get(&job_id) {
                None => {
                    send_error(sender, Some(job_id), "CANCEL_FAILED", "job not found".to_string()).await
                }
                Some(entry) if entry.job.status().is_terminal() => {
                    send_error(sender, Some(job_id), "CANCEL_FAILED", "job already terminal".to_string()).await
                }
                Some(entry) => {
                    // Idempotent: a second cancel on an already-cancelling,
                    // still-non-terminal job is a harmless no-op here - the
                    // single terminal `error{JOB_CANCELLED}` still comes
                    // from the worker observing the signal exactly once.
                    entry.job.cancel.cancel();
                    true
                }
            }
        }
    }
}

/// Handles one inbound binary (upload) frame. Returns `false` if the session
/// loop should stop.
async fn handle_binary_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    jobs: &HashMap<String, SessionJob>,
    data: Bytes,
) -> bool {
    let frame = match BinaryFrame::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            let code = match e {
                FrameError::Truncated | FrameError::HeaderLengthOverflow | FrameError::InvalidHeaderJson(_) => {
                    "INVALID_BINARY"
                }
            };
            return send_error(sender, None, code, e.to_string()).await;
        }
    };

    let job_id = frame.header.job_id.clone();
    let Some(entry) = jobs.get(&job_id) else {
        return send_error(sender, Some(job_id), "BINARY_ERROR", "unknown job".to_string()).await;
    };

    let expecting_upload = matches!(entry.job.status(), JobStatus::Queued | JobStatus::Downloading);
    let Some(upload) = entry.job.upload.as_ref() else {
        return send_error(sender, Some(job_id), "BINARY_ERROR", "job does not expect an upload".to_string()).await;
    };
    if !expecting_upload {
        return send_error(sender, Some(job_id), "BINARY_ERROR", "job is not awaiting an upload".to_string()).await;
    }

    let payload = crate::job::model::UploadPayload {
        filename: frame.header.filename,
        bytes: frame.payload,
    };
    match upload.deliver(payload) {
        Ok(()) => true,
        Err(_) => {
            send_error(sender, Some(job_id), "BINARY_ERROR", "upload already received".to_string()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{InputDescriptor, Operation, RemoveAudioOptions};

    fn sample_job(id: &str) -> SessionJob {
        let job = Arc::new(Job::new(
            id.to_string(),
            Operation::RemoveAudio(RemoveAudioOptions { keep_video_quality: false }),
            InputDescriptor::Url { url: "http://test/a.mp4".into() },
        ));
        SessionJob { job, terminal_since: None }
    }

    #[test]
    fn purge_retains_non_terminal_and_fresh_terminal_jobs() {
        let mut jobs = HashMap::new();
        jobs.insert("still-running".to_string(), sample_job("still-running"));

        let mut done = sample_job("just-finished");
        done.terminal_since = Some(Instant::now());
        jobs.insert("just-finished".to_string(), done);

        let mut stale = sample_job("long-finished");
        stale.terminal_since = Some(Instant::now() - Duration::from_secs(120));
        jobs.insert("long-finished".to_string(), stale);

        purge_retained_jobs(&mut jobs, Duration::from_secs(30));

        assert!(jobs.contains_key("still-running"));
        assert!(jobs.contains_key("just-finished"));
        assert!(!jobs.contains_key("long-finished"));
    }
}
