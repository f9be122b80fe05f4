//! Input stager: materializes a job's input as a local file, either by
//! streaming a url download or by waiting on the job's upload rendezvous.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::StageError;
use crate::job::model::{InputDescriptor, UploadRendezvous};
use crate::protocol_constants::{DOWNLOAD_PROGRESS_CHUNK_BYTES, UPLOAD_WAIT_TIMEOUT_SECS};

/// Stages `input` into `work_dir`, returning the local path of the staged
/// file. `on_progress` receives a 0-100 value scoped to the stager's own
/// 0-5% band of the overall job (the caller is responsible for that scaling;
/// this module just reports 0-100 over its own work). `cancel` is polled
/// between network chunks / upload-channel waits so an explicit cancel can
/// interrupt a stager stuck on slow I/O, not just subprocess supervision.
pub async fn stage(
    input: &InputDescriptor,
    work_dir: &Path,
    max_bytes: u64,
    upload: Option<&UploadRendezvous>,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u8),
) -> Result<PathBuf, StageError> {
    match input {
        InputDescriptor::Url { url } => stage_url(url, work_dir, max_bytes, cancel, &mut on_progress).await,
        InputDescriptor::Upload => stage_upload(work_dir, upload, max_bytes, cancel).await,
    }
}

async fn stage_url(
    url: &str,
    work_dir: &Path,
    max_bytes: u64,
    cancel: &CancellationToken,
    on_progress: &mut impl FnMut(u8),
) -> Result<PathBuf, StageError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| StageError::Network(e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(StageError::SchemeNotAllowed);
    }

    let response = reqwest::get(parsed)
        .await
        .map_err(|e| StageError::Network(e.to_string()))?;

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(StageError::SizeExceeded);
        }
    }

    let filename = basename_from_url(url);
    let dest_path = work_dir.join(filename);
    let mut file = tokio::fs::File::create(&dest_path)
        .await
        .map_err(|e| StageError::Network(e.to_string()))?;

    let total_hint = response.content_length();
    let mut written: u64 = 0;
    let mut since_last_report: u64 = 0;
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            next = stream.next() => match next {
                Some(chunk) => chunk.map_err(|e| StageError::Network(e.to_string()))?,
                None => break,
            },
        };
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(StageError::SizeExceeded);
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| StageError::Network(e.to_string()))?;

        since_last_report += chunk.len() as u64;
        if since_last_report >= DOWNLOAD_PROGRESS_CHUNK_BYTES {
            since_last_report = 0;
            if let Some(total) = total_hint {
                if total > 0 {
                    let percent = ((written as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as u8;
                    on_progress(percent);
                }
            }
        }
    }

    file.flush().await.map_err(|e| StageError::Network(e.to_string()))?;
    on_progress(100);
    Ok(dest_path)
}

async fn stage_upload(
    work_dir: &Path,
    upload: Option<&UploadRendezvous>,
    max_bytes: u64,
    cancel: &CancellationToken,
) -> Result<PathBuf, StageError> {
    let upload = upload.ok_or(StageError::UploadMissing)?;
    let receiver = upload.take_receiver().ok_or(StageError::UploadMissing)?;

    let payload = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StageError::Cancelled),
        result = tokio::time::timeout(Duration::from_secs(UPLOAD_WAIT_TIMEOUT_SECS), receiver) => {
            result.map_err(|_| StageError::UploadMissing)?.map_err(|_| StageError::UploadMissing)?
        }
    };

    if payload.bytes.len() as u64 > max_bytes {
        return Err(StageError::SizeExceeded);
    }

    let filename = sanitize_basename(&payload.filename);
    let dest_path = work_dir.join(filename);
    tokio::fs::write(&dest_path, &payload.bytes)
        .await
        .map_err(|e| StageError::Network(e.to_string()))?;
    Ok(dest_path)
}

/// Strips any path component the client-provided filename might carry,
/// leaving a bare basename - uploads are written inside a job-exclusive
/// `work_dir` so there is no directory traversal, just defense against a
/// pathological filename colliding with synthesized output names.
fn sanitize_basename(filename: &str) -> String {
    let candidate = Path::new(filename)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("upload");
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        "upload".to_string()
    } else {
        candidate.to_string()
    }
}

fn basename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "input".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_basename_strips_directory_components() {
        assert_eq!(sanitize_basename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_basename("clip.mp4"), "clip.mp4");
    }

    #[test]
    fn sanitize_basename_falls_back_for_empty_or_dotdot() {
        assert_eq!(sanitize_basename(".."), "upload");
        assert_eq!(sanitize_basename(""), "upload");
    }

    #[test]
    fn basename_from_url_takes_last_path_segment() {
        assert_eq!(basename_from_url("https://example.com/a/b/video.mp4"), "video.mp4");
        assert_eq!(basename_from_url("https://example.com/"), "input");
    }

    #[tokio::test]
    async fn stage_upload_rejects_missing_rendezvous() {
        let work_dir = std::env::temp_dir().join(format!("stage-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let result = stage_upload(&work_dir, None, 1024, &CancellationToken::new()).await;
        assert!(matches!(result, Err(StageError::UploadMissing)));
        tokio::fs::remove_dir_all(&work_dir).await.ok();
    }

    #[tokio::test]
    async fn stage_upload_rejects_oversized_payload() {
        let work_dir = std::env::temp_dir().join(format!("stage-test2-{}", std::process::id()));
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let rendezvous = UploadRendezvous::new();
        rendezvous
            .deliver(crate::job::model::UploadPayload {
                filename: "big.bin".into(),
                bytes: bytes::Bytes::from(vec![0u8; 2048]),
            })
            .unwrap();
        let result = stage_upload(&work_dir, Some(&rendezvous), 1024, &CancellationToken::new()).await;
        assert!(matches!(result, Err(StageError::SizeExceeded)));
        tokio::fs::remove_dir_all(&work_dir).await.ok();
    }

    #[tokio::test]
    async fn stage_upload_is_cancellable_before_delivery() {
        let work_dir = std::env::temp_dir().join(format!("stage-test3-{}", std::process::id()));
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let rendezvous = UploadRendezvous::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = stage_upload(&work_dir, Some(&rendezvous), 1024, &cancel).await;
        assert!(matches!(result, Err(StageError::Cancelled)));
        tokio::fs::remove_dir_all(&work_dir).await.ok();
    }
}
