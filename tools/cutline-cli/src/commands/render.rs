//! Render clips to a video file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cutline_common::config::AppConfig;
use cutline_render_engine::ffmpeg::{command_exists, inspect_media, FfmpegDecoderFactory, FfmpegSinkFactory};
use cutline_render_engine::{EncodeOptions, EngineContext, RenderEvent, RenderSession, RenderSettings};
use cutline_timeline::{MediaFile, MediaKind, ProjectSettings, Timeline, TimelineError, Timestamp};

pub struct RenderArgs {
    pub output: PathBuf,
    pub clips: Vec<String>,
    pub layered: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub duration: Option<f64>,
    pub image_secs: f64,
    pub codec: Option<String>,
    pub bitrate: Option<u32>,
    pub crf: Option<u8>,
}

/// A `--clip` argument: media path and optional timeline position.
#[derive(Debug, Clone, PartialEq)]
struct ClipSpec {
    path: PathBuf,
    at: Option<Timestamp>,
}

fn parse_clip_spec(spec: &str) -> anyhow::Result<ClipSpec> {
    if let Some((path, secs)) = spec.rsplit_once('@') {
        if let Ok(secs) = secs.trim().parse::<f64>() {
            if !(secs.is_finite() && secs >= 0.0) {
                anyhow::bail!("Clip position must be a non-negative number of seconds: {spec}");
            }
            return Ok(ClipSpec {
                path: PathBuf::from(path),
                at: Some(Timestamp::from_secs_f64(secs)),
            });
        }
    }
    if spec.is_empty() {
        anyhow::bail!("Empty clip argument");
    }
    Ok(ClipSpec {
        path: PathBuf::from(spec),
        at: None,
    })
}

/// Lays `clips` out on a new timeline: one track per clip when `layered`,
/// otherwise one after another on a single track. Clips with an explicit
/// position keep it.
fn build_timeline(
    settings: ProjectSettings,
    clips: Vec<(MediaFile, Option<Timestamp>)>,
    layered: bool,
    image_duration: Timestamp,
) -> Result<Timeline, TimelineError> {
    let mut timeline = Timeline::new(settings);
    let mut shared_track = None;
    let mut cursor = Timestamp::ZERO;

    for (media, at) in clips {
        let track = match (layered, shared_track) {
            (false, Some(track)) => track,
            _ => {
                let track = timeline.add_track();
                shared_track = Some(track);
                track
            }
        };
        let position = at.unwrap_or(if layered { Timestamp::ZERO } else { cursor });
        let is_image = media.is_image();
        let clip = timeline.add_clip(track, media, position, None)?;
        if is_image {
            timeline.trim_clip(track, clip, image_duration)?;
        }
        if let Some(clip) = timeline.clip(clip) {
            cursor = cursor.max(clip.end_position());
        }
    }
    Ok(timeline)
}

pub fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    if !command_exists("ffmpeg") || !command_exists("ffprobe") {
        anyhow::bail!("ffmpeg and ffprobe must be on PATH (run `cutline check`)");
    }

    let settings = ProjectSettings::new(
        args.width.unwrap_or(config.project.width),
        args.height.unwrap_or(config.project.height),
        args.fps.unwrap_or(config.project.frame_rate),
    );

    let mut clips = Vec::with_capacity(args.clips.len());
    for raw in &args.clips {
        let spec = parse_clip_spec(raw)?;
        let media = inspect_media(&spec.path)
            .with_context(|| format!("Failed to inspect {}", spec.path.display()))?;
        if media.kind == MediaKind::Audio {
            anyhow::bail!("{} has no video stream", spec.path.display());
        }
        tracing::debug!(path = %spec.path.display(), kind = ?media.kind, duration = %media.duration, "clip inspected");
        clips.push((media, spec.at));
    }

    let image_duration = Timestamp::from_secs_f64(args.image_secs.max(0.0));
    let mut timeline = build_timeline(settings, clips, args.layered, image_duration)?;
    if let Some(secs) = args.duration {
        timeline.set_duration(Timestamp::from_secs_f64(secs.max(0.0)));
    }

    let mut encode = EncodeOptions::new(settings.width, settings.height, settings.frame_rate)
        .with_defaults(&config.render)?;
    if let Some(codec) = &args.codec {
        encode.codec = codec.parse()?;
    }
    if let Some(bitrate) = args.bitrate {
        encode.bitrate_kbps = bitrate;
    }
    if args.crf.is_some() {
        encode.crf = args.crf;
    }

    println!("Rendering {} clip(s) on {} track(s)", args.clips.len(), timeline.track_count());
    println!("  Output: {}", args.output.display());
    println!("  Codec: {:?}", encode.codec);
    println!(
        "  Resolution: {}x{} @ {} fps",
        encode.width, encode.height, encode.fps
    );

    let ctx = EngineContext::from_config(Arc::new(FfmpegDecoderFactory::new()), &config.engine)?;
    let session = RenderSession::start(
        timeline.snapshot(),
        RenderSettings {
            output_path: args.output.clone(),
            encode,
        },
        ctx,
        &FfmpegSinkFactory::new(),
    )?;

    let mut total = 0u64;
    for event in session.events().iter() {
        match event {
            RenderEvent::Started { total_frames } => {
                total = total_frames;
                println!("  Frames: {total_frames}");
            }
            RenderEvent::FrameReady { index, pts } => {
                let progress = if total > 0 {
                    (index + 1) as f64 / total as f64 * 100.0
                } else {
                    100.0
                };
                print!("\r  Progress: {progress:.1}% ({}/{total} frames, at {pts})  ", index + 1);
                let _ = std::io::stdout().flush();
            }
            RenderEvent::Finished(summary) => {
                println!(
                    "\nRender complete: {} ({} frames in {:.1}s)",
                    args.output.display(),
                    summary.frames_written,
                    summary.elapsed_secs
                );
                break;
            }
            RenderEvent::Cancelled { frames_written } => {
                println!("\nRender cancelled after {frames_written} frames");
                break;
            }
            RenderEvent::Failed { error } => {
                println!("\nRender failed: {error}");
                break;
            }
        }
    }

    session.wait()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(path: &str, secs: i64) -> MediaFile {
        MediaFile::video(path, Timestamp::from_secs(secs))
    }

    #[test]
    fn test_parse_clip_spec() {
        assert_eq!(
            parse_clip_spec("intro.mp4").unwrap(),
            ClipSpec {
                path: PathBuf::from("intro.mp4"),
                at: None
            }
        );
        assert_eq!(
            parse_clip_spec("/media/a.mp4@2.5").unwrap().at,
            Some(Timestamp::from_millis(2_500))
        );
        // Not a number after '@': part of the file name.
        assert_eq!(
            parse_clip_spec("me@home.mp4").unwrap().path,
            PathBuf::from("me@home.mp4")
        );
        assert!(parse_clip_spec("a.mp4@-1").is_err());
        assert!(parse_clip_spec("").is_err());
    }

    #[test]
    fn test_sequential_layout_appends_clips() {
        let timeline = build_timeline(
            ProjectSettings::new(320, 240, 25),
            vec![(video("/a.mp4", 2), None), (video("/b.mp4", 3), None)],
            false,
            Timestamp::from_secs(1),
        )
        .unwrap();

        assert_eq!(timeline.track_count(), 1);
        let track = timeline.tracks().next().unwrap();
        let positions: Vec<Timestamp> = track.clips().map(|c| c.position).collect();
        assert_eq!(positions, vec![Timestamp::ZERO, Timestamp::from_secs(2)]);
        assert_eq!(timeline.content_end(), Timestamp::from_secs(5));
    }

    #[test]
    fn test_layered_layout_uses_one_track_per_clip() {
        let timeline = build_timeline(
            ProjectSettings::new(320, 240, 25),
            vec![
                (video("/a.mp4", 2), None),
                (MediaFile::image("/logo.png"), Some(Timestamp::from_secs(1))),
            ],
            true,
            Timestamp::from_secs(4),
        )
        .unwrap();

        assert_eq!(timeline.track_count(), 2);
        let logo = timeline
            .tracks()
            .flat_map(|t| t.clips())
            .find(|c| c.media.is_image())
            .unwrap();
        assert_eq!(logo.position, Timestamp::from_secs(1));
        assert_eq!(logo.duration, Timestamp::from_secs(4));
        assert_eq!(timeline.content_end(), Timestamp::from_secs(5));
    }
}
