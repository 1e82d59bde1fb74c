//! Encoder invocations for the two trim policies.
//!
//! `Copy` seeks on the input side and remuxes without re-encoding, so it is
//! fast but snaps to the preceding keyframe. `Precise` decodes up to the start
//! point and re-encodes H.264/AAC, which honors millisecond boundaries.

use std::path::PathBuf;

use tc_core::config::QualityProfile;
use tc_core::{DeliveryIntent, TimeRange, TrimMode};

/// Where the encoder writes its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Seekable MP4 written to this path, `moov` moved to the front.
    File(PathBuf),
    /// Fragmented MP4 written to stdout.
    Stream,
}

/// One extraction to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    pub source: PathBuf,
    pub range: TimeRange,
    pub mode: TrimMode,
    pub intent: DeliveryIntent,
}

/// Build the full argument vector (without the program name).
pub fn build_args(job: &EncodeJob, profile: &QualityProfile, target: &OutputTarget) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-v", "error", "-y"]
        .into_iter()
        .map(String::from)
        .collect();

    let source = job.source.to_string_lossy().into_owned();
    let start = job.range.ffmpeg_start();
    let duration = job.range.ffmpeg_duration();

    match job.mode {
        TrimMode::Copy => {
            // Input seek: jumps to the keyframe at or before `start`.
            args.extend(["-ss".into(), start, "-i".into(), source]);
            args.extend(["-t".into(), duration]);
            args.extend(map_args());
            args.extend(["-c", "copy", "-avoid_negative_ts", "make_zero"].map(String::from));
        }
        TrimMode::Precise => {
            // Output seek: decodes from the beginning of the GOP and drops
            // frames until `start`.
            args.extend(["-i".into(), source, "-ss".into(), start]);
            args.extend(["-t".into(), duration]);
            args.extend(map_args());
            args.extend(video_args(profile));
            args.extend(
                ["-c:a", "aac", "-b:a", &profile.audio_bitrate, "-ac", "2"].map(String::from),
            );
        }
    }

    match target {
        OutputTarget::File(path) => {
            args.extend(["-movflags", "+faststart", "-f", "mp4"].map(String::from));
            args.push(path.to_string_lossy().into_owned());
        }
        OutputTarget::Stream => {
            args.extend(
                [
                    "-movflags",
                    "frag_keyframe+empty_moov+default_base_moof",
                    "-f",
                    "mp4",
                    "pipe:1",
                ]
                .map(String::from),
            );
        }
    }

    args
}

fn map_args() -> impl Iterator<Item = String> {
    ["-map", "0:v:0", "-map", "0:a:0?"].into_iter().map(String::from)
}

fn video_args(profile: &QualityProfile) -> Vec<String> {
    let mut args: Vec<String> = [
        "-c:v",
        "libx264",
        "-profile:v",
        "high",
        "-pix_fmt",
        "yuv420p",
        "-preset",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(profile.preset.clone());
    args.push("-crf".into());
    args.push(profile.crf.to_string());

    if let Some(height) = profile.max_height {
        // Never upscale; keep width even for yuv420p.
        args.push("-vf".into());
        args.push(format!("scale=-2:'min({height},ih)'"));
    }
    args
}
