//! Subprocess supervisor: spawns `ffmpeg`, parses its stderr for progress,
//! and enforces cancellation/timeout with a graceful-then-forceful escalation.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::protocol_constants::{CANCEL_GRACE_SECS, PROGRESS_MIN_INTERVAL_MS, STDERR_TAIL_MAX_BYTES};

/// One progress tick reported from the transcoder's stderr.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub percent: u8,
    pub speed: Option<f64>,
}

/// Runs `ffmpeg_binary argv` to completion, invoking `on_progress` as the
/// stderr stream yields recognizable progress tokens.
///
/// The spawned child's lifetime is bound to this function's stack frame: if
/// `run` is dropped before completing (cancellation, panic unwinding), the
/// `Child` handle's own drop glue reaps the process rather than leaking it
/// as an orphan, since it is constructed with `kill_on_drop(true)`.
pub async fn run(
    ffmpeg_binary: &str,
    argv: &[String],
    total_duration_secs: Option<f64>,
    cancel: &CancellationToken,
    timeout: Duration,
    mut on_progress: impl FnMut(Progress),
) -> Result<(), SupervisorError> {
    let mut command = Command::new(ffmpeg_binary);
    command
        .args(argv)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

    let stderr = child
        .stderr
        .take()
        .expect("stderr was requested as piped");
    let mut lines = BufReader::new(stderr).lines();

    let mut duration_hint = total_duration_secs;
    let mut last_report = Instant::now() - Duration::from_millis(PROGRESS_MIN_INTERVAL_MS);
    let mut last_percent: u8 = 0;
    let mut stderr_tail = String::new();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(terminate_and_report(&mut child, SupervisorError::Cancelled).await);
            }
            _ = &mut deadline => {
                return Err(terminate_and_report(&mut child, SupervisorError::Timeout).await);
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        append_tail(&mut stderr_tail, &text);

                        if duration_hint.is_none() {
                            if let Some(d) = parse_ffmpeg_duration_from_metadata_line(&text) {
                                duration_hint = Some(d);
                            }
                        }

                        if let Some((elapsed, speed)) = parse_ffmpeg_progress_line(&text) {
                            // Never regress the reported value: a later, worse
                            // duration estimate must not make percent go backwards.
                            let percent = (compute_progress_percent(duration_hint, elapsed) as u8).max(last_percent);
                            let now = Instant::now();
                            let crossed_whole_percent = percent > last_percent;
                            if crossed_whole_percent
                                || now.duration_since(last_report) >= Duration::from_millis(PROGRESS_MIN_INTERVAL_MS)
                            {
                                on_progress(Progress { percent, speed });
                                last_report = now;
                                last_percent = percent;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        Err(SupervisorError::Exited {
            exit_code: status.code(),
            stderr_tail,
        })
    }
}

/// Sends a graceful termination signal, waits `CANCEL_GRACE_SECS`, then
/// forcefully kills if the process hasn't exited by itself.
async fn terminate_and_report(child: &mut Child, outcome: SupervisorError) -> SupervisorError {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SIGTERM gives ffmpeg a chance to finalize the output file's
            // container rather than leaving a truncated moov atom behind.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    let grace = tokio::time::sleep(Duration::from_secs(CANCEL_GRACE_SECS));
    tokio::pin!(grace);
    tokio::select! {
        _ = child.wait() => {}
        _ = &mut grace => {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
    outcome
}

fn append_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > STDERR_TAIL_MAX_BYTES {
        let mut overflow = tail.len() - STDERR_TAIL_MAX_BYTES;
        while !tail.is_char_boundary(overflow) {
            overflow += 1;
        }
        *tail = tail.split_off(overflow);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure stderr parsing, grounded on the same token vocabulary ffmpeg emits for
// both `-progress pipe:1` and its classic human-readable stderr lines.
// ─────────────────────────────────────────────────────────────────────────────

fn compute_progress_percent(total_duration: Option<f64>, elapsed_seconds: f64) -> f64 {
    match total_duration {
        Some(total) if total.is_finite() && total > 0.0 => {
            let elapsed = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
                elapsed_seconds
            } else {
                0.0
            };
            let ratio = elapsed / total;
            let value = (ratio * 100.0).clamp(0.0, 100.0);
            if value.is_finite() {
                value
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn parse_ffmpeg_progress_line(line: &str) -> Option<(f64, Option<f64>)> {
    let mut elapsed: Option<f64> = None;
    let mut speed: Option<f64> = None;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("time=") {
            elapsed = Some(parse_ffmpeg_time_to_seconds(rest));
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            elapsed = Some(parse_ffmpeg_time_to_seconds(rest));
        } else if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                elapsed = Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("speed=") {
            let value = rest.trim_end_matches('x');
            if let Ok(v) = value.parse::<f64>() {
                speed = Some(v);
            }
        }
    }

    elapsed.map(|e| (e, speed))
}

fn parse_ffmpeg_time_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

fn parse_ffmpeg_duration_from_metadata_line(line: &str) -> Option<f64> {
    let idx = line.find("Duration:")?;
    let rest = &line[idx + "Duration:".len()..];
    let time_str = rest.trim().split(',').next().unwrap_or("").trim();
    if time_str.is_empty() {
        return None;
    }
    let seconds = parse_ffmpeg_time_to_seconds(time_str);
    if seconds > 0.0 {
        Some(seconds)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_clamps_to_100() {
        assert_eq!(compute_progress_percent(Some(10.0), 50.0), 100.0);
    }

    #[test]
    fn progress_percent_is_zero_without_a_duration_hint() {
        assert_eq!(compute_progress_percent(None, 5.0), 0.0);
    }

    #[test]
    fn parses_out_time_ms_token() {
        let (elapsed, speed) = parse_ffmpeg_progress_line("out_time_ms=2500000 speed=1.5x").unwrap();
        assert!((elapsed - 2.5).abs() < 1e-6);
        assert_eq!(speed, Some(1.5));
    }

    #[test]
    fn parses_classic_time_token_with_hms() {
        let (elapsed, _) = parse_ffmpeg_progress_line("frame=10 time=00:01:05.50 bitrate=100kbits/s").unwrap();
        assert!((elapsed - 65.5).abs() < 1e-6);
    }

    #[test]
    fn extracts_duration_from_metadata_banner_line() {
        let duration =
            parse_ffmpeg_duration_from_metadata_line("  Duration: 00:02:30.00, start: 0.000000, bitrate: 128 kb/s");
        assert_eq!(duration, Some(150.0));
    }

    #[test]
    fn lines_without_recognized_tokens_yield_none() {
        assert!(parse_ffmpeg_progress_line("Stream #0:0: Video: h264").is_none());
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut tail = String::new();
        for i in 0..2000 {
            append_tail(&mut tail, &format!("line {i}"));
        }
        assert!(tail.len() <= STDERR_TAIL_MAX_BYTES);
    }

    #[test]
    fn stderr_tail_trims_on_a_char_boundary_with_multibyte_content() {
        let mut tail = String::new();
        for i in 0..2000 {
            append_tail(&mut tail, &format!("進捗レポート {i} 直後に切り詰め境界"));
        }
        assert!(tail.len() <= STDERR_TAIL_MAX_BYTES);
        assert!(std::str::from_utf8(tail.as_bytes()).is_ok());
    }
}
