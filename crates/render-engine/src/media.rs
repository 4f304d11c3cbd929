//! Decoder and sink interfaces the engine consumes.
//!
//! Concrete demuxing, decoding and encoding live behind these traits: the
//! [`ffmpeg`](crate::ffmpeg) backend drives system binaries, and the
//! [`synthetic`](crate::synthetic) backend generates test patterns.

use std::path::Path;

use cutline_common::config::RenderDefaults;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_timeline::{MediaFile, Timestamp};
use serde::{Deserialize, Serialize};

use crate::frame::{Frame, PixelFormat, StreamKind};

/// A forward-only decoder over one media file.
pub trait MediaDecoder: Send {
    /// Repositions so the next frames start at or before `position`
    /// (usually the preceding keyframe). Returns whether the seek happened.
    fn seek(&mut self, position: Timestamp) -> CutlineResult<bool>;

    /// Next decoded frame of `kind`, or `None` at end of stream.
    fn next_frame(&mut self, kind: StreamKind) -> CutlineResult<Option<Frame>>;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Opens decoders for media files.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, media: &MediaFile) -> CutlineResult<Box<dyn MediaDecoder>>;

    /// Check if this backend is available on the system.
    fn is_available(&self) -> bool {
        true
    }

    /// Backend name.
    fn name(&self) -> &str;
}

/// An encoder + muxer writing one output file.
pub trait MediaSink: Send {
    fn write_frame(&mut self, kind: StreamKind, frame: &Frame) -> CutlineResult<()>;

    /// Flushes buffered data and closes the output.
    fn finish(&mut self) -> CutlineResult<()>;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Opens sinks for output files.
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path, options: &EncodeOptions) -> CutlineResult<Box<dyn MediaSink>>;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Mpeg4,
}

impl std::str::FromStr for VideoCodec {
    type Err = CutlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "x264" => Ok(Self::H264),
            "h265" | "hevc" | "x265" => Ok(Self::H265),
            "vp9" => Ok(Self::Vp9),
            "mpeg4" => Ok(Self::Mpeg4),
            other => Err(CutlineError::config(format!("unknown video codec '{other}'"))),
        }
    }
}

/// Encode parameters for a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeOptions {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Constant rate factor; takes precedence over the bitrate when set.
    pub crf: Option<u8>,
    /// Layout of the frames handed to the sink.
    pub pixel_format: PixelFormat,
}

impl EncodeOptions {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            codec: VideoCodec::H264,
            width,
            height,
            fps,
            bitrate_kbps: 8_000,
            crf: None,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    /// Applies the configured codec, bitrate and CRF.
    pub fn with_defaults(mut self, defaults: &RenderDefaults) -> CutlineResult<Self> {
        self.codec = defaults.video_codec.parse()?;
        self.bitrate_kbps = defaults.bitrate_kbps;
        self.crf = defaults.crf;
        Ok(self)
    }
}
