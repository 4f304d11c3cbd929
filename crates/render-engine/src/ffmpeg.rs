//! FFmpeg subprocess backend.
//!
//! Decoding spawns `ffmpeg -ss <t> -i <file> -f rawvideo -` and reads fixed
//! size frames from its stdout. Encoding spawns an ffmpeg that reads raw
//! frames on stdin. Media properties come from `ffprobe` JSON output.

use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_timeline::{frame_interval, MediaFile, MediaKind, Timestamp};
use serde::Deserialize;

use crate::frame::{buffer_len, Frame, PixelFormat, StreamKind};
use crate::media::{
    DecoderFactory, EncodeOptions, MediaDecoder, MediaSink, SinkFactory, VideoCodec,
};

const DEFAULT_SOURCE_FPS: u32 = 30;

/// Check whether `binary` can be found on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Properties of a media file as reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub media: MediaFile,
    pub width: u32,
    pub height: u32,
    /// Video frame rate as `(numerator, denominator)`, if known.
    pub frame_rate: Option<(u32, u32)>,
}

impl StreamInfo {
    /// Interval between source frames, falling back to 30 fps.
    pub fn frame_interval(&self) -> Timestamp {
        match self.frame_rate {
            Some((num, den)) if num > 0 && den > 0 => {
                Timestamp::from_nanos(1_000_000_000i64 * i64::from(den) / i64::from(num))
            }
            _ => frame_interval(DEFAULT_SOURCE_FPS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

/// Describe `path` using the `ffprobe` on `PATH`.
pub fn inspect_media(path: &Path) -> CutlineResult<MediaFile> {
    inspect_with(Path::new("ffprobe"), path).map(|info| info.media)
}

/// Run `ffprobe` and classify the file.
pub fn inspect_with(ffprobe: &Path, path: &Path) -> CutlineResult<StreamInfo> {
    if !path.exists() {
        return Err(CutlineError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,width,height,r_frame_rate:format=format_name,duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| CutlineError::decode(format!("Failed to start ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(CutlineError::decode(format!(
            "ffprobe failed for {} (status {}): {}",
            path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_stream_info(&String::from_utf8_lossy(&output.stdout), path)
}

/// Classify ffprobe JSON output for `path`.
fn parse_stream_info(json: &str, path: &Path) -> CutlineResult<StreamInfo> {
    let report: FfprobeOutput = serde_json::from_str(json)?;
    let video = report
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = report
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    let format_name = report
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .unwrap_or_default();
    let duration = report
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .map(Timestamp::from_secs_f64)
        .unwrap_or(Timestamp::ZERO);

    let kind = match video {
        Some(_) if is_image_container(format_name) => MediaKind::StaticImage,
        Some(_) => MediaKind::Video,
        None if has_audio => MediaKind::Audio,
        None => {
            return Err(CutlineError::unsupported(format!(
                "{} has no audio or video stream",
                path.display()
            )))
        }
    };
    let duration = if kind == MediaKind::StaticImage {
        Timestamp::ZERO
    } else {
        duration
    };

    Ok(StreamInfo {
        media: MediaFile::new(kind, path, duration),
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
        frame_rate: video
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_rational),
    })
}

fn is_image_container(format_name: &str) -> bool {
    format_name
        .split(',')
        .any(|name| name == "image2" || name.ends_with("_pipe"))
}

fn parse_rational(value: &str) -> Option<(u32, u32)> {
    let (num, den) = value.split_once('/').unwrap_or((value, "1"));
    let num = num.trim().parse::<u32>().ok()?;
    let den = den.trim().parse::<u32>().ok()?;
    if num == 0 || den == 0 {
        return None;
    }
    Some((num, den))
}

/// Smallest multiple of `dt` that is `>= position`.
fn align_up(position: Timestamp, dt: Timestamp) -> Timestamp {
    let down = position.align_down(dt);
    if down == position {
        down
    } else {
        down + dt
    }
}

/// Decoder backend spawning one ffmpeg process per decode run.
#[derive(Debug, Clone)]
pub struct FfmpegDecoderFactory {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    format: PixelFormat,
}

impl FfmpegDecoderFactory {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            format: PixelFormat::Rgb24,
        }
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            ..Self::new()
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }
}

impl Default for FfmpegDecoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn open(&self, media: &MediaFile) -> CutlineResult<Box<dyn MediaDecoder>> {
        let info = inspect_with(&self.ffprobe, &media.path)?;
        if info.width == 0 || info.height == 0 {
            return Err(CutlineError::decode(format!(
                "{} has no decodable video stream",
                media.path.display()
            )));
        }
        tracing::debug!(
            path = %media.path.display(),
            width = info.width,
            height = info.height,
            interval = %info.frame_interval(),
            "ffmpeg decoder opened"
        );
        Ok(Box::new(FfmpegDecoder {
            ffmpeg: self.ffmpeg.clone(),
            path: media.path.clone(),
            width: info.width,
            height: info.height,
            interval: info.frame_interval(),
            format: self.format,
            process: None,
            next_pts: Timestamp::ZERO,
        }))
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg.to_string_lossy())
            && command_exists(&self.ffprobe.to_string_lossy())
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

struct DecodeProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

struct FfmpegDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    width: u32,
    height: u32,
    interval: Timestamp,
    format: PixelFormat,
    process: Option<DecodeProcess>,
    next_pts: Timestamp,
}

impl FfmpegDecoder {
    fn start(&mut self, position: Timestamp) -> CutlineResult<()> {
        self.stop();
        let position = position.max(Timestamp::ZERO);
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .arg("-ss")
            .arg(format!("{:.6}", position.as_secs_f64()))
            .arg("-i")
            .arg(&self.path)
            .args(["-f", "rawvideo", "-pix_fmt", self.format.ffmpeg_name(), "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CutlineError::decode(format!("Failed to start ffmpeg decoder: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CutlineError::decode("Failed to capture ffmpeg stdout"))?;

        tracing::trace!(pid = child.id(), path = %self.path.display(), %position, "ffmpeg decoder started");
        self.process = Some(DecodeProcess {
            child,
            stdout: BufReader::new(stdout),
        });
        self.next_pts = align_up(position, self.interval);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn seek(&mut self, position: Timestamp) -> CutlineResult<bool> {
        self.start(position)?;
        Ok(true)
    }

    fn next_frame(&mut self, kind: StreamKind) -> CutlineResult<Option<Frame>> {
        if kind == StreamKind::Audio {
            return Ok(None);
        }
        if self.process.is_none() {
            self.start(Timestamp::ZERO)?;
        }
        let Some(process) = self.process.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; buffer_len(self.width, self.height, self.format)];
        match process.stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.stop();
                return Ok(None);
            }
            Err(e) => {
                return Err(CutlineError::decode(format!(
                    "Failed reading frame from ffmpeg: {e}"
                )))
            }
        }

        let pts = self.next_pts;
        self.next_pts += self.interval;
        Frame::new(self.width, self.height, self.format, pts, self.interval, data).map(Some)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// ffmpeg encoder arguments for `options`.
pub fn codec_args(options: &EncodeOptions) -> Vec<String> {
    let mut args: Vec<String> = match options.codec {
        VideoCodec::H264 => vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ],
        VideoCodec::H265 => vec![
            "-c:v".to_string(),
            "libx265".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ],
        VideoCodec::Vp9 => vec![
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ],
        VideoCodec::Mpeg4 => vec!["-c:v".to_string(), "mpeg4".to_string()],
    };

    match (options.crf, options.codec) {
        (Some(crf), VideoCodec::Vp9) => args.extend([
            "-crf".to_string(),
            crf.to_string(),
            "-b:v".to_string(),
            "0".to_string(),
        ]),
        (Some(crf), VideoCodec::H264 | VideoCodec::H265) => {
            args.extend(["-crf".to_string(), crf.to_string()])
        }
        _ => args.extend([
            "-b:v".to_string(),
            format!("{}k", options.bitrate_kbps.max(100)),
        ]),
    }

    if options.codec != VideoCodec::Vp9 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args
}

/// Sink backend feeding raw frames to an ffmpeg encoder.
#[derive(Debug, Clone)]
pub struct FfmpegSinkFactory {
    ffmpeg: PathBuf,
}

impl FfmpegSinkFactory {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, path: &Path, options: &EncodeOptions) -> CutlineResult<Box<dyn MediaSink>> {
        if options.width == 0 || options.height == 0 {
            return Err(CutlineError::sink("Output resolution must be > 0"));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let args = codec_args(options);
        tracing::debug!(?args, output = %path.display(), "Starting ffmpeg encoder");
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", options.pixel_format.ffmpeg_name()])
            .arg("-s")
            .arg(format!("{}x{}", options.width, options.height))
            .arg("-r")
            .arg(options.fps.max(1).to_string())
            .args(["-i", "-"])
            .args(&args)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CutlineError::sink(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CutlineError::sink("Failed to capture ffmpeg stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CutlineError::sink("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently to avoid ffmpeg blocking on a full stderr pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        tracing::info!(pid = child.id(), output = %path.display(), "ffmpeg encoder started");
        Ok(Box::new(FfmpegSink {
            child,
            stdin: Some(stdin),
            stderr_task: Some(stderr_task),
            options: options.clone(),
            finished: false,
        }))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    options: EncodeOptions,
    finished: bool,
}

impl FfmpegSink {
    fn collect_stderr(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }
}

impl MediaSink for FfmpegSink {
    fn write_frame(&mut self, kind: StreamKind, frame: &Frame) -> CutlineResult<()> {
        if kind == StreamKind::Audio {
            return Ok(());
        }
        if frame.width != self.options.width
            || frame.height != self.options.height
            || frame.format != self.options.pixel_format
        {
            return Err(CutlineError::sink(format!(
                "frame is {}x{} {}, encoder expects {}x{} {}",
                frame.width,
                frame.height,
                frame.format,
                self.options.width,
                self.options.height,
                self.options.pixel_format
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CutlineError::sink("write after finish"))?;
        if let Err(e) = stdin.write_all(&frame.data) {
            let stderr = if e.kind() == ErrorKind::BrokenPipe {
                self.stdin.take();
                let _ = self.child.wait();
                self.collect_stderr()
            } else {
                String::new()
            };
            return Err(CutlineError::sink(format!(
                "Failed writing frame to ffmpeg: {e} {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn finish(&mut self) -> CutlineResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        let status = self
            .child
            .wait()
            .map_err(|e| CutlineError::sink(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = self.collect_stderr();

        if !status.success() {
            return Err(CutlineError::sink(format!(
                "ffmpeg encode failed (status {}): {}",
                status,
                stderr_output.trim()
            )));
        }
        tracing::debug!("ffmpeg encoder finished");
        Ok(())
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if !self.finished {
            self.stdin.take();
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
