//! Command synthesizer: pure argv construction for every supported operation.
//!
//! Nothing in this module touches the filesystem or spawns anything - it only
//! assembles the `ffmpeg` argument vector from a validated `Operation` plus
//! resolved input/output paths. Keeping this pure is what makes the unit
//! tests below exhaustive without ever running a transcoder.

use std::path::{Path, PathBuf};

use crate::job::model::{
    AudioCodec, CompressOptions, CompressPreset, ConvertOptions, ExtractAudioOptions, FilterOptions,
    FilterSpec, GifOptions, ImageFormat, Operation, RemoveAudioOptions, SpeedOptions,
    SubtitleMode, SubtitleOptions, ThumbnailOptions, TrimOptions,
};

/// Result of synthesizing a command: the argv to spawn, the primary output
/// path the supervisor should hand to the probe/stager, and whether the
/// client expects a binary artifact frame at all (some operations, like a
/// future "analyze" op, could produce metadata only - none do today, but the
/// field keeps the synthesizer/supervisor contract explicit).
pub struct SynthResult {
    pub argv: Vec<String>,
    pub output_path: PathBuf,
    pub expects_binary_output: bool,
}

/// Builds the full `ffmpeg` argv for `operation`, writing into `work_dir`.
///
/// `extra_inputs` carries additional local paths beyond the job's primary
/// staged input - only `concat` uses it today.
pub fn synthesize(
    operation: &Operation,
    input_path: &Path,
    extra_inputs: &[PathBuf],
    work_dir: &Path,
    ffmpeg_threads: Option<u32>,
) -> SynthResult {
    let mut argv = base_flags();
    apply_threads(&mut argv, ffmpeg_threads);

    match operation {
        Operation::Speed(o) => speed(&mut argv, input_path, work_dir, o),
        Operation::Compress(o) => compress(&mut argv, input_path, work_dir, o),
        Operation::ExtractAudio(o) => extract_audio(&mut argv, input_path, work_dir, o),
        Operation::RemoveAudio(o) => remove_audio(&mut argv, input_path, work_dir, o),
        Operation::Convert(o) => convert(&mut argv, input_path, work_dir, o),
        Operation::Thumbnail(o) => thumbnail(&mut argv, input_path, work_dir, o),
        Operation::Trim(o) => trim(&mut argv, input_path, work_dir, o),
        Operation::Concat(_) => concat(&mut argv, input_path, extra_inputs, work_dir),
        Operation::Gif(o) => gif(&mut argv, input_path, work_dir, o),
        Operation::Filter(o) => filter(&mut argv, input_path, work_dir, o),
        Operation::Subtitle(o) => subtitle(&mut argv, input_path, work_dir, o),
    }
}

fn base_flags() -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "info".into(),
    ]
}

fn apply_threads(argv: &mut Vec<String>, threads: Option<u32>) {
    if let Some(n) = threads {
        argv.push("-threads".into());
        argv.push(n.to_string());
    }
}

fn push_io(argv: &mut Vec<String>, input_path: &Path, output_path: &Path) {
    argv.push("-i".into());
    argv.push(input_path.display().to_string());
    argv.push(output_path.display().to_string());
}

fn out(work_dir: &Path, stem: &str, ext: &str) -> PathBuf {
    work_dir.join(format!("{stem}.{ext}"))
}

fn source_extension(input_path: &Path) -> &str {
    input_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
}

/// Nominal sample rate `speed()` resamples against when `maintain_pitch` is
/// false. The synthesizer is pure and never sees the real input's sample
/// rate (the probe runs on the transcoded output, not the source), so this
/// is a fixed assumption rather than a measured value - ffmpeg's `aresample`
/// still produces a playable track regardless of the source's true rate.
const SPEED_AUDIO_BASE_SAMPLE_RATE: u32 = 44_100;

fn speed(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &SpeedOptions) -> SynthResult {
    let ext = source_extension(input_path).to_string();
    let output_path = out(work_dir, "output", &ext);
    argv.push("-i".into());
    argv.push(input_path.display().to_string());

    let video_filter = format!("setpts={:.6}*PTS", 1.0 / o.speed_factor);
    argv.push("-filter:v".into());
    argv.push(video_filter);

    if o.maintain_pitch {
        // atempo only accepts [0.5, 100.0]; chain stages to cover the full
        // [0.25, 10.0] range the options validator allows.
        let atempo_chain = atempo_chain(o.speed_factor);
        argv.push("-filter:a".into());
        argv.push(atempo_chain);
    } else {
        // Resampling at a scaled rate shifts pitch together with playback
        // speed, mirroring what setpts does to the video timeline. The base
        // rate is nominal - the synthesizer never sees the real input
        // sample rate, since probing happens downstream on the output.
        argv.push("-filter:a".into());
        argv.push(format!(
            "asetrate={base}*{factor:.6},aresample={base}",
            base = SPEED_AUDIO_BASE_SAMPLE_RATE,
            factor = o.speed_factor,
        ));
    }

    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

/// `atempo` only accepts factors in [0.5, 2.0] per stage, so factors outside
/// that range are synthesized as a chain of stages whose product is the
/// requested `speed_factor`.
fn atempo_chain(speed_factor: f64) -> String {
    let mut remaining = speed_factor;
    let mut stages = Vec::new();
    while remaining > 2.0 {
        stages.push(2.0_f64);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push(0.5_f64);
        remaining /= 0.5;
    }
    stages.push(remaining);
    stages
        .iter()
        .map(|f| format!("atempo={f:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn compress(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &CompressOptions) -> SynthResult {
    let ext = o
        .target_format
        .clone()
        .unwrap_or_else(|| source_extension(input_path).to_string());
    let output_path = out(work_dir, "output", &ext);
    argv.push("-i".into());
    argv.push(input_path.display().to_string());

    let (default_crf, default_abitrate) = match o.preset {
        CompressPreset::Low => (28, 96),
        CompressPreset::Medium => (23, 128),
        CompressPreset::High => (18, 192),
        CompressPreset::Custom => (23, 128),
    };

    argv.push("-c:v".into());
    argv.push("libx264".into());
    if let Some(kbps) = o.video_bitrate_kbps {
        argv.push("-b:v".into());
        argv.push(format!("{kbps}k"));
    } else {
        argv.push("-crf".into());
        argv.push(o.crf.map(u32::from).unwrap_or(default_crf).to_string());
    }

    if let (Some(w), Some(h)) = (o.max_width, o.max_height) {
        argv.push("-vf".into());
        argv.push(format!(
            "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease"
        ));
    } else if let Some(w) = o.max_width {
        argv.push("-vf".into());
        argv.push(format!("scale={w}:-2"));
    } else if let Some(h) = o.max_height {
        argv.push("-vf".into());
        argv.push(format!("scale=-2:{h}"));
    }

    argv.push("-c:a".into());
    argv.push("aac".into());
    argv.push("-b:a".into());
    argv.push(format!("{}k", o.audio_bitrate_kbps.unwrap_or(default_abitrate)));

    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn extract_audio(
    argv: &mut Vec<String>,
    input_path: &Path,
    work_dir: &Path,
    o: &ExtractAudioOptions,
) -> SynthResult {
    let output_path = out(work_dir, "output", o.format.extension());
    argv.push("-i".into());
    argv.push(input_path.display().to_string());
    argv.push("-vn".into());

    let codec_name = match o.format {
        AudioCodec::Mp3 => "libmp3lame",
        AudioCodec::Aac | AudioCodec::M4a => "aac",
        AudioCodec::Wav => "pcm_s16le",
        AudioCodec::Opus => "libopus",
        AudioCodec::Flac => "flac",
        AudioCodec::Ogg => "libvorbis",
    };
    argv.push("-c:a".into());
    argv.push(codec_name.into());

    if let Some(kbps) = o.bitrate_kbps {
        argv.push("-b:a".into());
        argv.push(format!("{kbps}k"));
    }
    if let Some(rate) = o.sample_rate {
        argv.push("-ar".into());
        argv.push(rate.to_string());
    }

    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn remove_audio(
    argv: &mut Vec<String>,
    input_path: &Path,
    work_dir: &Path,
    o: &RemoveAudioOptions,
) -> SynthResult {
    let ext = source_extension(input_path).to_string();
    let output_path = out(work_dir, "output", &ext);
    argv.push("-i".into());
    argv.push(input_path.display().to_string());
    argv.push("-an".into());
    if o.keep_video_quality {
        argv.push("-c:v".into());
        argv.push("copy".into());
    }
    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn convert(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &ConvertOptions) -> SynthResult {
    let output_path = out(work_dir, "output", &o.target_format);
    argv.push("-i".into());
    argv.push(input_path.display().to_string());

    if o.stream_copy {
        argv.push("-c".into());
        argv.push("copy".into());
    } else {
        if let Some(vc) = &o.video_codec {
            argv.push("-c:v".into());
            argv.push(vc.clone());
        }
        if let Some(ac) = &o.audio_codec {
            argv.push("-c:a".into());
            argv.push(ac.clone());
        }
    }

    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn thumbnail(
    argv: &mut Vec<String>,
    input_path: &Path,
    work_dir: &Path,
    o: &ThumbnailOptions,
) -> SynthResult {
    let ext = match o.format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Jpg => "jpg",
    };

    argv.push("-i".into());
    argv.push(input_path.display().to_string());

    let scale = match (o.width, o.height) {
        (Some(w), Some(h)) => Some(format!("scale={w}:{h}")),
        (Some(w), None) => Some(format!("scale={w}:-2")),
        (None, Some(h)) => Some(format!("scale=-2:{h}")),
        (None, None) => None,
    };

    if let Some(ts) = o.timestamp {
        argv.push("-ss".into());
        argv.push(format!("{ts:.3}"));
        argv.push("-frames:v".into());
        argv.push("1".into());
        if let Some(vf) = &scale {
            argv.push("-vf".into());
            argv.push(vf.clone());
        }
        let output_path = out(work_dir, "thumbnail", ext);
        argv.push(output_path.display().to_string());
        return SynthResult {
            argv: argv.clone(),
            output_path,
            expects_binary_output: true,
        };
    }

    // count-based sampling: ffmpeg writes thumbnail_001.ext .. thumbnail_NNN.ext.
    // Only the first file is delivered as the job's binary artifact; see
    // DESIGN.md for why a multi-file archive format was not introduced.
    let count = o.count.unwrap_or(1);
    let vf = match scale {
        Some(s) => format!("fps=1/30,{s}"),
        None => "fps=1/30".into(),
    };
    argv.push("-vf".into());
    argv.push(vf);
    argv.push("-vframes".into());
    argv.push(count.to_string());
    let output_path = out(work_dir, "thumbnail_001", ext);
    argv.push(work_dir.join(format!("thumbnail_%03d.{ext}")).display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn trim(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &TrimOptions) -> SynthResult {
    let ext = source_extension(input_path).to_string();
    let output_path = out(work_dir, "output", &ext);
    argv.push("-ss".into());
    argv.push(format!("{:.3}", o.start_time));
    argv.push("-i".into());
    argv.push(input_path.display().to_string());
    argv.push("-to".into());
    argv.push(format!("{:.3}", o.end_time - o.start_time));
    argv.push("-c".into());
    argv.push("copy".into());
    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

/// Builds the `concat` demuxer's list-file contents for `input_path` followed
/// by `extra_inputs`. The caller (the job manager, which already performs
/// I/O to stage inputs) writes this to `work_dir.join("concat_list.txt")`
/// before invoking [`synthesize`] - kept out of this module so the
/// synthesizer itself never touches the filesystem.
pub fn concat_list_contents(input_path: &Path, extra_inputs: &[PathBuf]) -> String {
    let mut list_contents = format!("file '{}'\n", input_path.display());
    for extra in extra_inputs {
        list_contents.push_str(&format!("file '{}'\n", extra.display()));
    }
    list_contents
}

fn concat(argv: &mut Vec<String>, input_path: &Path, extra_inputs: &[PathBuf], work_dir: &Path) -> SynthResult {
    // The concat demuxer reads a list file rather than repeated -i flags.
    // The caller writes it; this function only references its fixed path.
    let _ = (input_path, extra_inputs);
    let list_path = work_dir.join("concat_list.txt");

    argv.push("-f".into());
    argv.push("concat".into());
    argv.push("-safe".into());
    argv.push("0".into());
    argv.push("-i".into());
    argv.push(list_path.display().to_string());
    argv.push("-c".into());
    argv.push("copy".into());

    let ext = source_extension(input_path).to_string();
    let output_path = out(work_dir, "output", &ext);
    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn gif(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &GifOptions) -> SynthResult {
    let output_path = out(work_dir, "output", "gif");
    argv.push("-ss".into());
    argv.push(format!("{:.3}", o.start_time));
    argv.push("-t".into());
    argv.push(format!("{:.3}", o.duration));
    argv.push("-i".into());
    argv.push(input_path.display().to_string());

    let width = o.width.unwrap_or(480);
    let vf = if o.optimize {
        format!(
            "fps={},scale={width}:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
            o.fps
        )
    } else {
        format!("fps={},scale={width}:-1:flags=lanczos", o.fps)
    };
    argv.push("-vf".into());
    argv.push(vf);

    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn filter(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &FilterOptions) -> SynthResult {
    let ext = source_extension(input_path).to_string();
    let output_path = out(work_dir, "output", &ext);
    argv.push("-i".into());
    argv.push(input_path.display().to_string());

    // `normalize` takes precedence over a `volume` multiplier in the same
    // chain, so the volume stage is collected separately and only folded in
    // if no normalize stage was requested.
    let mut video_filters = Vec::new();
    let mut audio_filters = Vec::new();
    let mut volume_filter: Option<String> = None;
    let mut normalize_requested = false;
    for spec in &o.filters {
        match spec {
            FilterSpec::Scale { width, height } => {
                let w = width.map(|v| v.to_string()).unwrap_or_else(|| "-2".into());
                let h = height.map(|v| v.to_string()).unwrap_or_else(|| "-2".into());
                video_filters.push(format!("scale={w}:{h}"));
            }
            FilterSpec::Rotate { degrees } => {
                video_filters.push(match degrees.rem_euclid(360) {
                    90 => "transpose=1".into(),
                    180 => "transpose=1,transpose=1".into(),
                    270 => "transpose=2".into(),
                    d => format!("rotate={}*PI/180", d),
                });
            }
            FilterSpec::Crop { width, height, x, y } => {
                video_filters.push(format!("crop={width}:{height}:{x}:{y}"));
            }
            FilterSpec::Fps { fps } => video_filters.push(format!("fps={fps}")),
            FilterSpec::Volume { multiplier } => volume_filter = Some(format!("volume={multiplier:.6}")),
            FilterSpec::Normalize => {
                normalize_requested = true;
            }
        }
    }
    if normalize_requested {
        audio_filters.push("loudnorm".into());
    } else if let Some(volume) = volume_filter {
        audio_filters.push(volume);
    }

    if !video_filters.is_empty() {
        argv.push("-vf".into());
        argv.push(video_filters.join(","));
    }
    if !audio_filters.is_empty() {
        argv.push("-af".into());
        argv.push(audio_filters.join(","));
    }

    argv.push(output_path.display().to_string());
    SynthResult {
        argv: argv.clone(),
        output_path,
        expects_binary_output: true,
    }
}

fn subtitle(argv: &mut Vec<String>, input_path: &Path, work_dir: &Path, o: &SubtitleOptions) -> SynthResult {
    let track = o.track_index.unwrap_or(0);
    match o.mode {
        SubtitleMode::Extract => {
            let output_path = out(work_dir, "subtitles", "srt");
            argv.push("-i".into());
            argv.push(input_path.display().to_string());
            argv.push("-map".into());
            argv.push(format!("0:s:{track}"));
            argv.push(output_path.display().to_string());
            SynthResult {
                argv: argv.clone(),
                output_path,
                expects_binary_output: true,
            }
        }
        SubtitleMode::Burn => {
            let ext = source_extension(input_path).to_string();
            let output_path = out(work_dir, "output", &ext);
            argv.push("-i".into());
            argv.push(input_path.display().to_string());
            argv.push("-vf".into());
            argv.push(format!(
                "subtitles='{}':si={track}",
                input_path.display()
            ));
            argv.push(output_path.display().to_string());
            SynthResult {
                argv: argv.clone(),
                output_path,
                expects_binary_output: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::InputDescriptor;
    use std::path::PathBuf;

    fn input() -> PathBuf {
        PathBuf::from("/work/in.mp4")
    }

    fn work() -> PathBuf {
        PathBuf::from("/work")
    }

    #[test]
    fn speed_maintain_pitch_chains_atempo_for_extreme_factors() {
        let o = SpeedOptions {
            speed_factor: 8.0,
            maintain_pitch: true,
        };
        let result = synthesize(&Operation::Speed(o), &input(), &[], &work(), None);
        let af_index = result.argv.iter().position(|a| a == "-filter:a").unwrap();
        assert!(result.argv[af_index + 1].contains("atempo=2"));
    }

    #[test]
    fn speed_without_maintain_pitch_resamples_audio_instead_of_dropping_it() {
        let o = SpeedOptions {
            speed_factor: 2.0,
            maintain_pitch: false,
        };
        let result = synthesize(&Operation::Speed(o), &input(), &[], &work(), None);
        assert!(!result.argv.contains(&"-an".to_string()));
        let af_index = result.argv.iter().position(|a| a == "-filter:a").unwrap();
        assert!(result.argv[af_index + 1].contains("asetrate"));
    }

    #[test]
    fn trim_uses_input_seek_and_stream_copy() {
        let o = TrimOptions {
            start_time: 5.0,
            end_time: 15.0,
        };
        let result = synthesize(&Operation::Trim(o), &input(), &[], &work(), None);
        assert!(result.argv.contains(&"-to".to_string()));
        assert!(result.argv.contains(&"copy".to_string()));
    }

    #[test]
    fn thumbnail_timestamp_mode_requests_single_frame() {
        let o = ThumbnailOptions {
            timestamp: Some(3.5),
            count: None,
            format: ImageFormat::Png,
            width: Some(320),
            height: None,
        };
        let result = synthesize(&Operation::Thumbnail(o), &input(), &[], &work(), None);
        assert!(result.argv.contains(&"-frames:v".to_string()));
        assert_eq!(result.output_path.extension().unwrap(), "png");
    }

    #[test]
    fn concat_list_contents_references_every_input_in_order() {
        let extras = vec![PathBuf::from("/work/b.mp4"), PathBuf::from("/work/c.mp4")];
        let contents = concat_list_contents(&input(), &extras);
        let in_pos = contents.find("in.mp4").unwrap();
        let b_pos = contents.find("b.mp4").unwrap();
        let c_pos = contents.find("c.mp4").unwrap();
        assert!(in_pos < b_pos && b_pos < c_pos);
    }

    #[test]
    fn concat_points_at_the_fixed_list_path_without_writing_it() {
        let extras = vec![PathBuf::from("/work/b.mp4")];
        let o = crate::job::model::ConcatOptions {
            inputs: vec!["http://x/b.mp4".into()],
        };
        let work_dir = work();
        let result = synthesize(&Operation::Concat(o), &input(), &extras, &work_dir, None);
        assert!(result.argv.contains(&"concat".to_string()));
        assert!(result.argv.iter().any(|a| a.ends_with("concat_list.txt")));
        assert!(!work_dir.join("concat_list.txt").exists());
    }

    #[test]
    fn gif_optimize_builds_palette_filtergraph() {
        let o = GifOptions {
            start_time: 0.0,
            duration: 3.0,
            fps: 10,
            width: Some(240),
            optimize: true,
        };
        let result = synthesize(&Operation::Gif(o), &input(), &[], &work(), None);
        let vf_index = result.argv.iter().position(|a| a == "-vf").unwrap();
        assert!(result.argv[vf_index + 1].contains("palettegen"));
    }

    #[test]
    fn filter_normalize_takes_precedence_over_volume_in_the_same_chain() {
        let o = FilterOptions {
            filters: vec![
                FilterSpec::Volume { multiplier: 2.0 },
                FilterSpec::Normalize,
            ],
        };
        let result = synthesize(&Operation::Filter(o), &input(), &[], &work(), None);
        let af_index = result.argv.iter().position(|a| a == "-af").unwrap();
        assert_eq!(result.argv[af_index + 1], "loudnorm");
    }

    #[test]
    fn filter_rotate_90_uses_transpose() {
        let o = FilterOptions {
            filters: vec![FilterSpec::Rotate { degrees: 90 }],
        };
        let result = synthesize(&Operation::Filter(o), &input(), &[], &work(), None);
        let vf_index = result.argv.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(result.argv[vf_index + 1], "transpose=1");
    }

    #[test]
    fn subtitle_extract_maps_requested_track() {
        let o = SubtitleOptions {
            mode: SubtitleMode::Extract,
            track_index: Some(2),
        };
        let result = synthesize(&Operation::Subtitle(o), &input(), &[], &work(), None);
        assert!(result.argv.contains(&"0:s:2".to_string()));
        assert_eq!(result.output_path.extension().unwrap(), "srt");
    }

    #[test]
    fn no_op_is_unreachable_for_unvalidated_input_descriptor() {
        // synthesize never looks at InputDescriptor directly - this test
        // documents that boundary so a future refactor doesn't blur it.
        let _ = InputDescriptor::Upload;
    }
}
